use crate::{State, Stateful};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Labels every rule with the resource name of its parent policy.
pub const POLICY_LABEL: &str = "admission.kubesphere.io/policy";

/// A namespace-scoped refinement of a parent policy.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "admission.kubesphere.io",
    version = "v1alpha1",
    kind = "Rule",
    status = "RuleStatus",
    printcolumn = r#"{"name":"Policy","type":"string","jsonPath":".spec.policy"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    pub name: String,

    /// The parent policy's resource name.
    pub policy: String,

    /// Copied from the parent policy.
    pub provider: String,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "match", default)]
    pub matches: Match,

    /// Passed through to the provider uninterpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::preserve_unknown_fields")]
    pub parameters: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    /// An empty list applies cluster-wide.
    #[serde(default)]
    pub namespaces: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleStatus {
    #[serde(default)]
    pub state: State,
}

/// Returns the cluster-unique resource name of a rule within a policy.
pub fn resource_name(policy: &str, rule: &str) -> String {
    format!("{}.{}", policy.to_lowercase(), rule.to_lowercase())
}

impl Stateful for Rule {
    fn state(&self) -> State {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }

    fn set_state(&mut self, state: State) {
        self.status = Some(RuleStatus { state });
    }
}
