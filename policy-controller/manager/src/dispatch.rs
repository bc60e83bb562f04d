use crate::Metrics;
use admission_policy_controller_core::{
    k8s::{Policy, PolicyContent, ResourceExt, Rule},
    ConstraintScope, Error, ProviderError, ProviderRegistry, Result,
};
use std::{future::Future, time::Duration};
use tokio::time;

/// Routes constraint registration to providers by name, bounding each call by a timeout.
#[derive(Clone, Debug)]
pub(crate) struct Dispatch {
    providers: ProviderRegistry,
    timeout: Duration,
    metrics: Metrics,
}

impl Dispatch {
    pub(crate) fn new(providers: ProviderRegistry, timeout: Duration, metrics: Metrics) -> Self {
        Self {
            providers,
            timeout,
            metrics,
        }
    }

    pub(crate) fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Compiles `content` and registers the constraint instance identified by `scope`.
    ///
    /// Content without targets enforces nothing, so there is nothing to register.
    pub(crate) async fn register(
        &self,
        provider: &str,
        content: &PolicyContent,
        scope: &ConstraintScope,
    ) -> Result<()> {
        let p = self.providers.require(provider)?;
        if content.targets.is_empty() {
            tracing::warn!(
                %provider,
                kind = %scope.kind,
                "Content has no targets; nothing to register"
            );
            return Ok(());
        }

        let compiled = self
            .call(provider, "compile", p.compile_constraint(content))
            .await?;
        self.call(provider, "upsert", p.upsert(&compiled, scope))
            .await?;
        tracing::info!(
            %provider,
            kind = %scope.kind,
            name = %scope.name(),
            "Registered constraint"
        );
        Ok(())
    }

    pub(crate) async fn deregister(&self, provider: &str, scope: &ConstraintScope) -> Result<()> {
        let p = self.providers.require(provider)?;
        self.call(provider, "remove", p.remove(scope)).await?;
        tracing::info!(
            %provider,
            kind = %scope.kind,
            name = %scope.name(),
            "Deregistered constraint"
        );
        Ok(())
    }

    async fn call<T>(
        &self,
        provider: &str,
        operation: &'static str,
        call: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T> {
        let (result, outcome) = match time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => (Ok(value), "ok"),
            Ok(Err(ProviderError::Invalid(error))) => {
                (Err(Error::invalid(format_args!("{error:#}"))), "invalid")
            }
            Ok(Err(ProviderError::Unavailable(source))) => (
                Err(Error::ProviderUnavailable {
                    provider: provider.to_string(),
                    source,
                }),
                "unavailable",
            ),
            Err(_) => (
                Err(Error::ProviderUnavailable {
                    provider: provider.to_string(),
                    source: anyhow::anyhow!("{operation} timed out after {:?}", self.timeout),
                }),
                "timeout",
            ),
        };
        self.metrics.provider_call(provider, operation, outcome);
        if let Err(error) = result.as_ref() {
            tracing::warn!(%provider, operation, %error, "Provider call failed");
        }
        result
    }
}

/// Identifies the cluster-wide constraint instance registered for `policy`.
pub(crate) fn policy_scope(policy: &Policy) -> ConstraintScope {
    ConstraintScope::policy(&policy.spec.content.spec.names.name, policy.name_any())
        .with_parameters(policy.spec.content.spec.parameters.values.clone())
}

/// Identifies the constraint instance registered for `rule`. It is compiled from the parent's
/// content and carries the rule's own namespaces. The rule's parameters replace the parent's when
/// set.
pub(crate) fn rule_scope(parent: &Policy, rule: &Rule) -> ConstraintScope {
    let parameters = rule
        .spec
        .parameters
        .clone()
        .or_else(|| parent.spec.content.spec.parameters.values.clone());
    ConstraintScope::rule(
        &parent.spec.content.spec.names.name,
        parent.name_any(),
        &rule.spec.name,
    )
    .with_namespaces(rule.spec.matches.namespaces.clone())
    .with_parameters(parameters)
}
