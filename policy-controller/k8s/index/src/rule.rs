use crate::{Index, RuleKey};
use admission_policy_controller_core::k8s::{ResourceExt, Rule, Stateful};
use ahash::AHashMap as HashMap;
use std::{collections::hash_map::Entry, sync::Arc};
use tracing::info_span;

impl kubert::index::IndexClusterResource<Rule> for Index {
    fn apply(&mut self, rule: Rule) {
        let name = rule.name_unchecked();
        let _span = info_span!("apply", %name).entered();

        if rule.spec.policy.is_empty() || rule.spec.name.is_empty() {
            tracing::warn!("Ignoring Rule without a policy or name");
            return;
        }

        let key = RuleKey {
            policy: rule.spec.policy.to_lowercase(),
            rule: rule.spec.name.to_lowercase(),
        };
        if let Some(prior) = self.rule_keys.insert(name, key.clone()) {
            if prior != key {
                self.remove_rule(&prior);
            }
        }

        tracing::debug!(policy = %key.policy, state = %rule.state(), "Indexing Rule");
        self.rules
            .entry(key.policy)
            .or_insert_with(HashMap::new)
            .insert(key.rule, Arc::new(rule));
    }

    fn delete(&mut self, name: String) {
        let _span = info_span!("delete", %name).entered();

        if let Some(key) = self.rule_keys.remove(&name) {
            tracing::debug!(policy = %key.policy, "Deleted Rule");
            self.remove_rule(&key);
        }
    }
}

impl Index {
    fn remove_rule(&mut self, key: &RuleKey) {
        if let Entry::Occupied(mut rules) = self.rules.entry(key.policy.clone()) {
            rules.get_mut().remove(&key.rule);
            if rules.get().is_empty() {
                rules.remove();
            }
        }
    }
}
