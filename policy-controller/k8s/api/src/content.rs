use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The body of a policy template: a provider-agnostic constraint shape plus
/// per-provider content targets.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTemplateContent {
    pub spec: PolicyContentSpec,

    #[serde(default)]
    pub targets: Vec<PolicyTemplateContentTarget>,
}

/// Describes how a template behaves for one provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTemplateContentTarget {
    pub target: String,
    pub provider: String,
    pub expression: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub import: Vec<String>,
}

/// The resolved content of a policy, limited to its provider's targets.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyContent {
    pub spec: PolicyContentSpec,

    #[serde(default)]
    pub targets: Vec<PolicyContentTarget>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyContentTarget {
    pub target: String,
    pub expression: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub import: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyContentSpec {
    pub names: Names,

    #[serde(default)]
    pub parameters: Parameters,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Names {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub short_names: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Parameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Validation>,

    /// Parameter values supplied when a template is instantiated. Templates
    /// never set this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::preserve_unknown_fields")]
    pub values: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    #[serde(
        rename = "openAPIV3Schema",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    #[schemars(schema_with = "crate::preserve_unknown_fields")]
    pub open_api_v3_schema: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_schema: Option<bool>,
}

// === impl PolicyTemplateContent ===

impl PolicyTemplateContent {
    /// Iterates over the distinct providers this template has targets for,
    /// in declaration order.
    pub fn providers(&self) -> impl Iterator<Item = &str> {
        let mut seen = Vec::<&str>::new();
        self.targets.iter().filter_map(move |t| {
            if seen.contains(&t.provider.as_str()) {
                return None;
            }
            seen.push(t.provider.as_str());
            Some(t.provider.as_str())
        })
    }

    pub fn supports(&self, provider: &str) -> bool {
        self.targets.iter().any(|t| t.provider == provider)
    }
}

impl From<&PolicyTemplateContentTarget> for PolicyContentTarget {
    fn from(t: &PolicyTemplateContentTarget) -> Self {
        Self {
            target: t.target.clone(),
            expression: t.expression.clone(),
            import: t.import.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(provider: &str) -> PolicyTemplateContentTarget {
        PolicyTemplateContentTarget {
            target: "admission.k8s.gatekeeper.sh".to_string(),
            provider: provider.to_string(),
            expression: "package k8s".to_string(),
            import: vec![],
        }
    }

    #[test]
    fn providers_are_distinct() {
        let content = PolicyTemplateContent {
            targets: vec![target("gatekeeper"), target("kyverno"), target("gatekeeper")],
            ..Default::default()
        };
        assert_eq!(
            content.providers().collect::<Vec<_>>(),
            vec!["gatekeeper", "kyverno"]
        );
        assert!(content.supports("kyverno"));
        assert!(!content.supports("opa"));
    }

    #[test]
    fn parses_validation_schema() {
        let spec: PolicyContentSpec = serde_json::from_value(serde_json::json!({
            "names": { "name": "K8sRequiredLabels" },
            "parameters": {
                "validation": {
                    "openAPIV3Schema": { "type": "object" },
                    "legacySchema": false,
                },
            },
        }))
        .unwrap();
        let validation = spec.parameters.validation.unwrap();
        assert_eq!(
            validation.open_api_v3_schema,
            Some(serde_json::json!({ "type": "object" }))
        );
        assert_eq!(validation.legacy_schema, Some(false));
        assert!(spec.parameters.values.is_none());
    }
}
