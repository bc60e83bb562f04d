//! Pluggable constraint-evaluation backends.
//!
//! Providers are registered by name when the process starts and are never added or removed
//! afterwards; the registry is shared read-only by every manager operation.

use crate::{k8s::PolicyContent, Error};
use std::{collections::BTreeMap, fmt, sync::Arc};

/// The provider-native form of a policy's content, as produced by
/// [`Provider::compile_constraint`].
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledConstraint {
    /// The constraint kind the compiled template defines.
    pub kind: String,

    /// The provider's template document.
    pub template: serde_json::Value,
}

/// Identifies one constraint instance registered with a provider.
///
/// A policy registers a single cluster-wide instance. Each rule under it registers its own
/// instance, scoped to the rule's namespaces and carrying the rule's parameters, so that rules
/// never overwrite one another.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintScope {
    pub kind: String,
    pub policy: String,
    pub rule: Option<String>,
    pub namespaces: Vec<String>,
    pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider rejected the content itself; retrying will not help.
    #[error("invalid constraint: {0}")]
    Invalid(#[source] anyhow::Error),

    #[error(transparent)]
    Unavailable(anyhow::Error),
}

#[async_trait::async_trait]
pub trait Provider: Send + Sync + 'static {
    async fn compile_constraint(
        &self,
        content: &PolicyContent,
    ) -> Result<CompiledConstraint, ProviderError>;

    /// Registers or updates the constraint instance identified by `scope`. Must be idempotent.
    async fn upsert(
        &self,
        constraint: &CompiledConstraint,
        scope: &ConstraintScope,
    ) -> Result<(), ProviderError>;

    /// Removes the constraint instance identified by `scope`. Removing an instance that does not
    /// exist succeeds.
    async fn remove(&self, scope: &ConstraintScope) -> Result<(), ProviderError>;
}

#[derive(Clone, Default)]
pub struct ProviderRegistry(Arc<BTreeMap<String, Arc<dyn Provider>>>);

#[derive(Default)]
pub struct Builder(BTreeMap<String, Arc<dyn Provider>>);

// === impl ConstraintScope ===

impl ConstraintScope {
    pub fn policy(kind: impl Into<String>, policy: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            policy: policy.into(),
            rule: None,
            namespaces: vec![],
            parameters: None,
        }
    }

    pub fn rule(
        kind: impl Into<String>,
        policy: impl Into<String>,
        rule: impl Into<String>,
    ) -> Self {
        Self {
            rule: Some(rule.into()),
            ..Self::policy(kind, policy)
        }
    }

    pub fn with_namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn with_parameters(mut self, parameters: Option<serde_json::Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// A name unique to this instance among all instances of its kind.
    pub fn name(&self) -> String {
        match self.rule.as_deref() {
            Some(rule) => crate::k8s::rule::resource_name(&self.policy, rule),
            None => self.policy.to_lowercase(),
        }
    }
}

// === impl ProviderRegistry ===

impl ProviderRegistry {
    pub fn builder() -> Builder {
        Builder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Provider>> {
        self.0.get(name)
    }

    /// Looks up an enabled provider, failing if it is unknown or disabled.
    pub fn require(&self, name: &str) -> Result<Arc<dyn Provider>, Error> {
        self.get(name)
            .cloned()
            .ok_or_else(|| Error::ProviderNotSupported(name.to_string()))
    }

    /// Iterates over enabled providers, ordered by name.
    pub fn enabled(&self) -> impl Iterator<Item = (&str, &Arc<dyn Provider>)> {
        self.0.iter().map(|(name, p)| (name.as_str(), p))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

// === impl Builder ===

impl Builder {
    pub fn with_provider(mut self, name: impl Into<String>, provider: impl Provider) -> Self {
        let name = name.into();
        if self.0.insert(name.clone(), Arc::new(provider)).is_some() {
            tracing::warn!(%name, "Provider registered more than once; keeping the last");
        }
        self
    }

    /// Registers the provider built by `mk` only when `enabled` is set.
    pub fn with_optional_provider<P, F>(self, enabled: bool, name: impl Into<String>, mk: F) -> Self
    where
        P: Provider,
        F: FnOnce() -> P,
    {
        let name: String = name.into();
        if enabled {
            return self.with_provider(name, mk());
        }
        tracing::debug!(%name, "Provider disabled");
        self
    }

    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry(Arc::new(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    struct Noop;

    #[async_trait::async_trait]
    impl Provider for Noop {
        async fn compile_constraint(
            &self,
            content: &PolicyContent,
        ) -> Result<CompiledConstraint, ProviderError> {
            Ok(CompiledConstraint {
                kind: content.spec.names.name.clone(),
                template: serde_json::Value::Null,
            })
        }

        async fn upsert(
            &self,
            _: &CompiledConstraint,
            _: &ConstraintScope,
        ) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn remove(&self, _: &ConstraintScope) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[test]
    fn disabled_providers_are_not_supported() {
        let registry = ProviderRegistry::builder()
            .with_optional_provider(true, "gatekeeper", || Noop)
            .with_optional_provider(false, "kyverno", || Noop)
            .build();

        assert!(registry.get("gatekeeper").is_some());
        assert_eq!(
            registry.require("kyverno").err().map(|e| e.kind()),
            Some(ErrorKind::ProviderNotSupported)
        );
        assert_eq!(
            registry.require("opa").err().map(|e| e.kind()),
            Some(ErrorKind::ProviderNotSupported)
        );
        assert_eq!(
            registry.enabled().map(|(n, _)| n).collect::<Vec<_>>(),
            vec!["gatekeeper"]
        );
    }

    #[test]
    fn scope_names() {
        assert_eq!(ConstraintScope::policy("K8sPSP", "NP-1").name(), "np-1");
        assert_eq!(
            ConstraintScope::rule("K8sPSP", "np-1", "r-ns-prod").name(),
            "np-1.r-ns-prod"
        );
    }
}
