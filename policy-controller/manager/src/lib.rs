//! Admission Policy Manager
//!
//! Implements the operations exposed to the API layer over policy templates, policies and rules.
//! Reads are served by a watch-fed cache; writes go to the API and are serialized per resource by
//! resource-version compare-and-swap with a bounded number of retries. No in-process locks are
//! taken.
//!
//! Activation is the only transition that registers anything with a provider, and resources are
//! always persisted inactive before their constraint is registered. A failure or cancellation
//! part-way through an operation therefore leaves an inactive resource that can be retried.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod dispatch;
mod metrics;
mod operator;
mod policy;
mod rule;
pub mod translate;
mod write;

#[cfg(test)]
mod tests;

pub use self::{
    metrics::Metrics, operator::Operator, policy::PolicyManager, rule::RuleManager,
};
use admission_policy_controller_core::{
    k8s::{Policy, Rule},
    store::{Reader, Writer},
};
use std::{sync::Arc, time::Duration};

/// Handles to the resource store.
#[derive(Clone)]
pub struct Stores {
    pub reader: Arc<dyn Reader>,
    pub policies: Arc<dyn Writer<Policy>>,
    pub rules: Arc<dyn Writer<Rule>>,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Bounds each call to a provider.
    pub provider_timeout: Duration,

    /// Accepts policies whose template has no content for their provider, with a warning.
    pub allow_empty_policies: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(5),
            allow_empty_policies: false,
        }
    }
}
