use crate::Index;
use admission_policy_controller_core::k8s::{Policy, ResourceExt, Stateful};
use std::sync::Arc;
use tracing::info_span;

impl kubert::index::IndexClusterResource<Policy> for Index {
    fn apply(&mut self, policy: Policy) {
        let name = policy.name_unchecked();
        let _span = info_span!("apply", %name).entered();

        tracing::debug!(state = %policy.state(), "Indexing Policy");
        self.policies.insert(name, Arc::new(policy));
    }

    fn delete(&mut self, name: String) {
        let _span = info_span!("delete", %name).entered();

        // Rules are deleted by the manager before their policy, and their own watch events
        // remove them from the index.
        if self.policies.remove(&name).is_some() {
            tracing::debug!("Deleted Policy");
        }
    }
}
