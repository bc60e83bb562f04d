//! Request and response bodies exchanged with the API layer.

use crate::{
    k8s::{
        rule::resource_name, Parameters, Policy, PolicyContent, PolicyTemplate,
        PolicyTemplateContentTarget, ResourceExt, Rule, Stateful,
    },
    validation::{validate_label, validate_resource_name},
    Error, Result, State,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};

/// Creates or updates a policy.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPolicy {
    /// Defaults to the template's name.
    #[serde(default)]
    pub name: String,

    pub policy_template: String,

    pub provider: String,

    /// Defaults to the template's description.
    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,

    /// On create, `None` means inactive. On update, `None` keeps the current state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
}

/// Creates or updates a rule under a policy.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRule {
    pub name: String,

    /// Must match the parent policy's provider when set.
    #[serde(default)]
    pub provider: String,

    #[serde(default)]
    pub description: String,

    /// A JSON document passed through to the provider.
    #[serde(default)]
    pub parameters: String,

    /// An empty list applies the rule cluster-wide.
    #[serde(default)]
    pub namespaces: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
}

/// A non-fatal condition reported alongside a successful write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum Warning {
    /// The template has no content for the policy's provider, so the policy enforces nothing.
    #[serde(rename_all = "camelCase")]
    NoMatchingTargets { template: String, provider: String },
}

/// The result of a write, with any warnings raised while translating it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Outcome<T> {
    #[serde(flatten)]
    pub value: T,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTemplateDetail {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub parameters: Parameters,
    pub targets: Vec<PolicyTemplateContentTarget>,
    pub providers: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<Time>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDetail {
    pub name: String,
    pub display_name: String,
    pub policy_template: String,
    pub provider: String,
    pub description: String,
    pub state: State,
    pub content: PolicyContent,

    /// Rules under this policy, limited to those that apply to the requested namespace, if any.
    pub rules: Vec<RuleSummary>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<Time>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSummary {
    pub name: String,
    pub state: State,
    pub namespaces: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDetail {
    pub name: String,
    pub policy: String,
    pub provider: String,
    pub description: String,
    pub namespaces: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,

    pub state: State,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<Time>,
}

// === impl PostPolicy ===

impl PostPolicy {
    pub fn validate(&self) -> Result<()> {
        if !self.name.is_empty() {
            validate_resource_name(&self.name.to_lowercase()).map_err(Error::invalid)?;
        }
        if self.policy_template.is_empty() {
            return Err(Error::invalid("policyTemplate must be set"));
        }
        if self.provider.is_empty() {
            return Err(Error::invalid("provider must be set"));
        }
        Ok(())
    }
}

// === impl PostRule ===

impl PostRule {
    /// Validates the request for a rule under the policy named `policy`.
    ///
    /// Rule names are labels so that `policy.rule` identifies a single rule.
    pub fn validate(&self, policy: &str) -> Result<()> {
        validate_label(&self.name.to_lowercase()).map_err(Error::invalid)?;
        validate_resource_name(&resource_name(policy, &self.name)).map_err(Error::invalid)?;
        for ns in &self.namespaces {
            validate_label(ns).map_err(Error::invalid)?;
        }
        self.parameters()?;
        Ok(())
    }

    /// Parses the raw parameter payload. An empty payload means no parameters.
    pub fn parameters(&self) -> Result<Option<serde_json::Value>> {
        if self.parameters.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&self.parameters)
            .map(Some)
            .map_err(|e| Error::invalid(format_args!("rule parameters must be JSON: {e}")))
    }

    /// Returns the requested namespaces, sorted and deduplicated.
    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

// === impl Warning ===

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatchingTargets { template, provider } => write!(
                f,
                "policy template {template} has no content for provider {provider}; \
                 the policy will not enforce anything"
            ),
        }
    }
}

// === impl Outcome ===

impl<T> Outcome<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            warnings: vec![],
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<Warning>) -> Self {
        self.warnings = warnings;
        self
    }
}

// === impl PolicyTemplateDetail ===

impl From<&PolicyTemplate> for PolicyTemplateDetail {
    fn from(template: &PolicyTemplate) -> Self {
        let content = &template.spec.content;
        Self {
            name: template.name_any(),
            display_name: template.spec.name.clone(),
            description: template.spec.description.clone(),
            parameters: content.spec.parameters.clone(),
            targets: content.targets.clone(),
            providers: content.providers().map(Into::into).collect(),
            creation_timestamp: template.creation_timestamp(),
        }
    }
}

// === impl PolicyDetail ===

impl PolicyDetail {
    /// Describes `policy` and those of its `rules` that apply to `namespace`. Rules without
    /// namespaces apply everywhere. When `namespace` is `None`, all rules are listed.
    pub fn new<'r>(
        policy: &Policy,
        rules: impl IntoIterator<Item = &'r Rule>,
        namespace: Option<&str>,
    ) -> Self {
        let mut rules = rules
            .into_iter()
            .filter(|r| match namespace {
                Some(ns) => {
                    let namespaces = &r.spec.matches.namespaces;
                    namespaces.is_empty() || namespaces.iter().any(|n| n == ns)
                }
                None => true,
            })
            .map(RuleSummary::from)
            .collect::<Vec<_>>();
        rules.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            name: policy.name_any(),
            display_name: policy.spec.name.clone(),
            policy_template: policy.spec.policy_template.clone(),
            provider: policy.spec.provider.clone(),
            description: policy.spec.description.clone(),
            state: policy.state(),
            content: policy.spec.content.clone(),
            rules,
            creation_timestamp: policy.creation_timestamp(),
        }
    }
}

// === impl RuleSummary ===

impl From<&Rule> for RuleSummary {
    fn from(rule: &Rule) -> Self {
        Self {
            name: rule.spec.name.clone(),
            state: rule.state(),
            namespaces: rule.spec.matches.namespaces.clone(),
        }
    }
}

// === impl RuleDetail ===

impl From<&Rule> for RuleDetail {
    fn from(rule: &Rule) -> Self {
        Self {
            name: rule.spec.name.clone(),
            policy: rule.spec.policy.clone(),
            provider: rule.spec.provider.clone(),
            description: rule.spec.description.clone(),
            namespaces: rule.spec.matches.namespaces.clone(),
            parameters: rule.spec.parameters.clone(),
            state: rule.state(),
            creation_timestamp: rule.creation_timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn post_rule(name: &str) -> PostRule {
        PostRule {
            name: name.to_string(),
            provider: "gatekeeper".to_string(),
            parameters: "{}".to_string(),
            namespaces: vec!["prod".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn post_policy_requires_template_and_provider() {
        let post = PostPolicy {
            name: "NP-1".to_string(),
            policy_template: "baseline-no-privileged".to_string(),
            provider: "gatekeeper".to_string(),
            ..Default::default()
        };
        assert!(post.validate().is_ok());

        let no_provider = PostPolicy {
            provider: String::new(),
            ..post.clone()
        };
        assert_eq!(
            no_provider.validate().unwrap_err().kind(),
            ErrorKind::InvalidInput
        );

        let bad_name = PostPolicy {
            name: "np_1".to_string(),
            ..post
        };
        assert_eq!(bad_name.validate().unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn post_rule_parameters() {
        assert_eq!(
            post_rule("r").parameters().unwrap(),
            Some(serde_json::json!({}))
        );
        let empty = PostRule {
            parameters: "  ".to_string(),
            ..post_rule("r")
        };
        assert_eq!(empty.parameters().unwrap(), None);

        let invalid = PostRule {
            parameters: "labels: [owner]".to_string(),
            ..post_rule("r")
        };
        assert_eq!(
            invalid.validate("np-1").unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn post_rule_names_are_labels() {
        assert!(post_rule("R-NS-Prod").validate("np-1").is_ok());
        assert!(post_rule("r").validate("np-1.a").is_ok());
        assert_eq!(
            post_rule("a.b").validate("np-1").unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            post_rule("").validate("np-1").unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn post_rule_namespaces() {
        let rule = PostRule {
            namespaces: vec!["prod".into(), "dev".into(), "prod".into()],
            ..post_rule("r")
        };
        assert!(rule.validate("np-1").is_ok());
        assert_eq!(rule.namespaces(), vec!["dev".to_string(), "prod".to_string()]);

        let invalid = PostRule {
            namespaces: vec!["Prod".into()],
            ..post_rule("r")
        };
        assert!(invalid.validate("np-1").is_err());
    }
}
