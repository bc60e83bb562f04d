use crate::content::PolicyTemplateContent;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A reusable, provider-agnostic catalog entry from which policies are
/// instantiated. Templates are never written by this controller.
#[derive(Clone, Debug, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "admission.kubesphere.io",
    version = "v1alpha1",
    kind = "PolicyTemplate",
    shortname = "ptpl"
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTemplateSpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub content: PolicyTemplateContent,
}
