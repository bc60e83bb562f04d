#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod content;
pub mod labels;
pub mod policy;
pub mod policy_template;
pub mod rule;

pub use self::{
    content::{
        Names, Parameters, PolicyContent, PolicyContentSpec, PolicyContentTarget,
        PolicyTemplateContent, PolicyTemplateContentTarget, Validation,
    },
    labels::Labels,
    policy::{Policy, PolicySpec, PolicyStatus},
    policy_template::{PolicyTemplate, PolicyTemplateSpec},
    rule::{Match, Rule, RuleSpec, RuleStatus},
};
pub use k8s_openapi::{
    api::core::v1::Namespace, apimachinery::pkg::apis::meta::v1::OwnerReference,
};
pub use kube::{
    api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams, ResourceExt},
    core::ErrorResponse,
    Client, Error, Resource,
};

use schemars::{
    gen::SchemaGenerator,
    schema::{InstanceType, Schema, SchemaObject},
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

pub const API_GROUP: &str = "admission.kubesphere.io";

/// Lifecycle state shared by policies and rules.
///
/// A resource without a status is inactive.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum State {
    #[default]
    Inactive,
    Active,
}

/// Access to the lifecycle state stored in a resource's status.
pub trait Stateful {
    fn state(&self) -> State;

    fn set_state(&mut self, state: State);
}

#[derive(Debug, thiserror::Error)]
#[error("invalid state: {0}")]
pub struct InvalidState(String);

// === impl State ===

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

impl FromStr for State {
    type Err = InvalidState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("inactive") {
            return Ok(Self::Inactive);
        }
        if s.eq_ignore_ascii_case("active") {
            return Ok(Self::Active);
        }
        Err(InvalidState(s.to_string()))
    }
}

/// Schema for opaque JSON documents embedded in a resource.
pub(crate) fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema
        .extensions
        .insert("x-kubernetes-preserve-unknown-fields".to_string(), true.into());
    Schema::Object(schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_state() {
        assert_eq!("Active".parse::<State>().unwrap(), State::Active);
        assert_eq!("inactive".parse::<State>().unwrap(), State::Inactive);
        assert!("enabled".parse::<State>().is_err());
        assert_eq!(
            serde_json::to_value(State::Active).unwrap(),
            serde_json::json!("active")
        );
    }
}
