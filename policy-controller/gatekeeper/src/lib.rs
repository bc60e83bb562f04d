//! A [`Provider`] that enforces policies with OPA Gatekeeper.
//!
//! A policy's content compiles to a `ConstraintTemplate`, which Gatekeeper turns into a
//! constraint CRD. Each active policy or rule is then registered as one constraint of that kind.
//! All objects are written with server-side apply, so registration is idempotent.
//!
//! Removing a scope deletes only its constraint. The `ConstraintTemplate` is shared by every
//! policy and rule of its kind and is left in place; an unused template enforces nothing.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod constraint;

use admission_policy_controller_core::{
    k8s::PolicyContent, CompiledConstraint, ConstraintScope, Provider, ProviderError,
};
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams},
    core::{DynamicObject, ErrorResponse},
    Client,
};
use std::{fmt, str::FromStr};

pub const PROVIDER_NAME: &str = "gatekeeper";

#[derive(Clone)]
pub struct Gatekeeper {
    client: Client,
    field_manager: String,
    enforcement_action: EnforcementAction,
}

/// What Gatekeeper does with a violation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum EnforcementAction {
    #[default]
    Deny,
    Dryrun,
    Warn,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid enforcement action: {0}")]
pub struct InvalidEnforcementAction(String);

// === impl Gatekeeper ===

impl Gatekeeper {
    pub fn new(
        client: Client,
        field_manager: impl Into<String>,
        enforcement_action: EnforcementAction,
    ) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
            enforcement_action,
        }
    }

    fn apply_params(&self) -> PatchParams {
        PatchParams::apply(&self.field_manager).force()
    }
}

impl fmt::Debug for Gatekeeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gatekeeper")
            .field("field_manager", &self.field_manager)
            .field("enforcement_action", &self.enforcement_action)
            .finish()
    }
}

#[async_trait::async_trait]
impl Provider for Gatekeeper {
    async fn compile_constraint(
        &self,
        content: &PolicyContent,
    ) -> Result<CompiledConstraint, ProviderError> {
        constraint::compile(content)
    }

    async fn upsert(
        &self,
        compiled: &CompiledConstraint,
        scope: &ConstraintScope,
    ) -> Result<(), ProviderError> {
        let templates = Api::<DynamicObject>::all_with(
            self.client.clone(),
            &constraint::template_resource(),
        );
        let template_name = compiled.kind.to_lowercase();
        templates
            .patch(
                &template_name,
                &self.apply_params(),
                &Patch::Apply(&compiled.template),
            )
            .await
            .map_err(provider_error)?;
        tracing::debug!(template = %template_name, "Applied ConstraintTemplate");

        // The constraint CRD is created asynchronously by Gatekeeper once it has processed the
        // template, so the first apply of a new kind may fail until it exists. Callers retry.
        let constraints = Api::<DynamicObject>::all_with(
            self.client.clone(),
            &constraint::constraint_resource(&scope.kind),
        );
        let name = scope.name();
        constraints
            .patch(
                &name,
                &self.apply_params(),
                &Patch::Apply(constraint::constraint(scope, self.enforcement_action)),
            )
            .await
            .map_err(provider_error)?;
        tracing::debug!(kind = %scope.kind, %name, "Applied constraint");
        Ok(())
    }

    async fn remove(&self, scope: &ConstraintScope) -> Result<(), ProviderError> {
        let constraints = Api::<DynamicObject>::all_with(
            self.client.clone(),
            &constraint::constraint_resource(&scope.kind),
        );
        let name = scope.name();
        match constraints.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {
                tracing::debug!(kind = %scope.kind, %name, "Deleted constraint");
                Ok(())
            }
            Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => {
                tracing::debug!(kind = %scope.kind, %name, "Constraint already deleted");
                Ok(())
            }
            Err(error) => Err(provider_error(error)),
        }
    }
}

/// Requests Gatekeeper refuses outright are invalid; anything else may succeed on retry.
fn provider_error(error: kube::Error) -> ProviderError {
    match error {
        kube::Error::Api(ErrorResponse { code: 400 | 422, .. }) => {
            ProviderError::Invalid(error.into())
        }
        error => ProviderError::Unavailable(error.into()),
    }
}

// === impl EnforcementAction ===

impl EnforcementAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deny => "deny",
            Self::Dryrun => "dryrun",
            Self::Warn => "warn",
        }
    }
}

impl fmt::Display for EnforcementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

impl FromStr for EnforcementAction {
    type Err = InvalidEnforcementAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deny" => Ok(Self::Deny),
            "dryrun" => Ok(Self::Dryrun),
            "warn" => Ok(Self::Warn),
            _ => Err(InvalidEnforcementAction(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: String::new(),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn classifies_api_errors() {
        assert!(matches!(
            provider_error(api_error(422)),
            ProviderError::Invalid(_)
        ));
        assert!(matches!(
            provider_error(api_error(404)),
            ProviderError::Unavailable(_)
        ));
        assert!(matches!(
            provider_error(api_error(503)),
            ProviderError::Unavailable(_)
        ));
    }

    #[test]
    fn parses_enforcement_actions() {
        assert_eq!("deny".parse::<EnforcementAction>().unwrap(), EnforcementAction::Deny);
        assert_eq!("DryRun".parse::<EnforcementAction>().unwrap(), EnforcementAction::Dryrun);
        assert!("audit".parse::<EnforcementAction>().is_err());
    }
}
