use crate::{content::PolicyContent, State, Stateful};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A named instantiation of one template bound to one provider.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "admission.kubesphere.io",
    version = "v1alpha1",
    kind = "Policy",
    status = "PolicyStatus",
    shortname = "pol",
    printcolumn = r#"{"name":"Provider","type":"string","jsonPath":".spec.provider"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    /// The display name, preserved verbatim. The resource name is its
    /// lowercased form.
    pub name: String,

    pub policy_template: String,

    pub provider: String,

    #[serde(default)]
    pub description: String,

    pub content: PolicyContent,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    #[serde(default)]
    pub state: State,
}

impl Stateful for Policy {
    fn state(&self) -> State {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }

    fn set_state(&mut self, state: State) {
        self.status = Some(PolicyStatus { state });
    }
}
