use std::fmt;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by translators and managers.
///
/// The API layer maps each [`ErrorKind`] to a transport status; this crate never formats
/// responses.
#[derive(Debug, Error)]
pub enum Error {
    #[error("policy template {0} not found")]
    TemplateNotFound(String),

    #[error("policy {0} not found")]
    PolicyNotFound(String),

    #[error("rule {rule} not found in policy {policy}")]
    RuleNotFound { policy: String, rule: String },

    #[error("policy {0} already exists")]
    PolicyAlreadyExists(String),

    #[error("rule {rule} already exists in policy {policy}")]
    RuleAlreadyExists { policy: String, rule: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("provider {0} is not supported")]
    ProviderNotSupported(String),

    #[error("policy template {template} has no content for provider {provider}")]
    TemplateProviderMismatch { template: String, provider: String },

    #[error("{kind} {name} was modified concurrently; gave up after {attempts} attempts")]
    Conflict {
        kind: &'static str,
        name: String,
        attempts: usize,
    },

    #[error("provider {provider} is unavailable: {source}")]
    ProviderUnavailable {
        provider: String,
        #[source]
        source: anyhow::Error,
    },

    /// A cascading delete stopped at `step`. Nothing after `step` was attempted, so repeating
    /// the delete resumes from there.
    #[error("delete of {name} failed at {step}: {source}")]
    Delete {
        name: String,
        step: DeleteStep,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidInput,
    ProviderNotSupported,
    TemplateProviderMismatch,
    Conflict,
    ProviderUnavailable,
    Internal,
}

/// Identifies the sub-step of a cascading delete.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeleteStep {
    /// Deleting the named child rule.
    Rule(String),

    /// Removing the constraint registered with the provider.
    DeregisterConstraint,

    /// Deleting the resource itself.
    DeleteResource,
}

// === impl Error ===

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TemplateNotFound(_) | Self::PolicyNotFound(_) | Self::RuleNotFound { .. } => {
                ErrorKind::NotFound
            }
            Self::PolicyAlreadyExists(_) | Self::RuleAlreadyExists { .. } => {
                ErrorKind::AlreadyExists
            }
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::ProviderNotSupported(_) => ErrorKind::ProviderNotSupported,
            Self::TemplateProviderMismatch { .. } => ErrorKind::TemplateProviderMismatch,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::ProviderUnavailable { .. } => ErrorKind::ProviderUnavailable,
            Self::Delete { source, .. } => source.kind(),
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn invalid(msg: impl fmt::Display) -> Self {
        Self::InvalidInput(msg.to_string())
    }

    pub(crate) fn at_step(self, name: impl Into<String>, step: DeleteStep) -> Self {
        Self::Delete {
            name: name.into(),
            step,
            source: Box::new(self),
        }
    }

    /// Wraps a failed sub-step of a cascading delete.
    pub fn delete_step(name: impl Into<String>, step: DeleteStep) -> impl FnOnce(Self) -> Self {
        let name = name.into();
        move |error| error.at_step(name, step)
    }
}

// === impl DeleteStep ===

impl fmt::Display for DeleteStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rule(name) => write!(f, "deleting rule {name}"),
            Self::DeregisterConstraint => "deregistering constraint".fmt(f),
            Self::DeleteResource => "deleting resource".fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_errors_report_the_underlying_kind() {
        let error = Error::ProviderUnavailable {
            provider: "gatekeeper".to_string(),
            source: anyhow::anyhow!("connection refused"),
        };
        let error = Error::delete_step("np-1", DeleteStep::DeregisterConstraint)(error);
        assert_eq!(error.kind(), ErrorKind::ProviderUnavailable);
        assert_eq!(
            error.to_string(),
            "delete of np-1 failed at deregistering constraint: provider gatekeeper is unavailable: connection refused"
        );
    }

    #[test]
    fn not_found_kinds() {
        for error in [
            Error::TemplateNotFound("t".to_string()),
            Error::PolicyNotFound("p".to_string()),
            Error::RuleNotFound {
                policy: "p".to_string(),
                rule: "r".to_string(),
            },
        ] {
            assert_eq!(error.kind(), ErrorKind::NotFound, "{error}");
        }
    }
}
