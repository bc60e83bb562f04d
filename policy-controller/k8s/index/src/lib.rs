//! Admission Policy Controller Index
//!
//! Watches the cluster's `PolicyTemplate`, `Policy` and `Rule` resources and maintains an
//! in-memory view of them that serves every read made by the managers.
//!
//! ```text
//! [ PolicyTemplate ] <- [ Policy ] <- [ Rule ]*
//! ```
//!
//! Rules are indexed under their parent policy's resource name so that a policy's rules can be
//! enumerated without scanning all rules. The index is updated by watch tasks and is therefore
//! eventually consistent with the API: a write is not visible here until its watch event has
//! been applied.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod policy;
mod policy_template;
mod rule;

#[cfg(test)]
mod tests;

use admission_policy_controller_core::{
    k8s::{Policy, PolicyTemplate, Rule},
    store,
};
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::sync::Arc;

pub type SharedIndex = Arc<RwLock<Index>>;

/// Holds all indexed resources. Updated by the watch tasks.
#[derive(Debug, Default)]
pub struct Index {
    templates: HashMap<String, Arc<PolicyTemplate>>,

    policies: HashMap<String, Arc<Policy>>,

    /// Rules by parent policy, then by lowercased rule name.
    rules: HashMap<String, HashMap<String, Arc<Rule>>>,

    /// Maps a rule's resource name to its key in `rules`, since deletions carry only the
    /// resource name.
    rule_keys: HashMap<String, RuleKey>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct RuleKey {
    policy: String,
    rule: String,
}

/// Serves [`store::Reader`] lookups from a [`SharedIndex`].
#[derive(Clone, Debug)]
pub struct Cache(SharedIndex);

// === impl Index ===

impl Index {
    pub fn shared() -> SharedIndex {
        Arc::new(RwLock::new(Self::default()))
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty() && self.policies.is_empty() && self.rule_keys.is_empty()
    }
}

// === impl Cache ===

impl Cache {
    pub fn new(index: SharedIndex) -> Self {
        Self(index)
    }

    pub fn index(&self) -> &SharedIndex {
        &self.0
    }
}

impl store::Reader for Cache {
    fn template(&self, name: &str) -> Option<Arc<PolicyTemplate>> {
        self.0.read().templates.get(name).cloned()
    }

    fn templates(&self) -> Vec<Arc<PolicyTemplate>> {
        self.0.read().templates.values().cloned().collect()
    }

    fn policy(&self, name: &str) -> Option<Arc<Policy>> {
        self.0.read().policies.get(&name.to_lowercase()).cloned()
    }

    fn policies(&self) -> Vec<Arc<Policy>> {
        self.0.read().policies.values().cloned().collect()
    }

    fn rule(&self, policy: &str, rule: &str) -> Option<Arc<Rule>> {
        self.0
            .read()
            .rules
            .get(&policy.to_lowercase())?
            .get(&rule.to_lowercase())
            .cloned()
    }

    fn rules(&self, policy: &str) -> Vec<Arc<Rule>> {
        self.0
            .read()
            .rules
            .get(&policy.to_lowercase())
            .map(|rules| rules.values().cloned().collect())
            .unwrap_or_default()
    }
}
