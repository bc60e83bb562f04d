use crate::Index;
use admission_policy_controller_core::k8s::{PolicyTemplate, ResourceExt};
use std::sync::Arc;
use tracing::info_span;

impl kubert::index::IndexClusterResource<PolicyTemplate> for Index {
    fn apply(&mut self, template: PolicyTemplate) {
        let name = template.name_unchecked();
        let _span = info_span!("apply", %name).entered();

        if template.spec.content.targets.is_empty() {
            tracing::warn!(
                "PolicyTemplate has no targets; policies created from it will be rejected"
            );
        }

        tracing::debug!("Indexing PolicyTemplate");
        self.templates.insert(name, Arc::new(template));
    }

    fn delete(&mut self, name: String) {
        let _span = info_span!("delete", %name).entered();

        if self.templates.remove(&name).is_some() {
            tracing::debug!("Deleted PolicyTemplate");
        }
    }

    // Each template is indexed independently, so the default reset suffices.
}
