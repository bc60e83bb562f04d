use super::*;
use admission_policy_controller_core::{
    k8s::{
        rule::POLICY_LABEL, Match, ObjectMeta, PolicyContent, PolicySpec, PolicyTemplateContent,
        PolicyTemplateSpec, RuleSpec,
    },
    store::Reader,
};
use kubert::index::IndexClusterResource;
use maplit::btreemap;
use pretty_assertions::assert_eq;

#[test]
fn indexes_templates_and_policies() {
    let index = Index::shared();
    let cache = Cache::new(index.clone());

    index.write().apply(mk_template("k8srequiredlabels"));
    index.write().apply(mk_policy("np-1"));

    assert!(cache.template("k8srequiredlabels").is_some());
    assert!(cache.policy("np-1").is_some());
    assert!(cache.policy("NP-1").is_some(), "policy lookups ignore case");
    assert_eq!(cache.policies().len(), 1);

    IndexClusterResource::<Policy>::delete(&mut *index.write(), "np-1".to_string());
    assert!(cache.policy("np-1").is_none());
    assert!(cache.template("k8srequiredlabels").is_some());
}

#[test]
fn indexes_rules_by_policy() {
    let index = Index::shared();
    let cache = Cache::new(index.clone());

    index.write().apply(mk_rule("np-1", "r-ns-prod"));
    index.write().apply(mk_rule("np-1", "r-ns-dev"));
    index.write().apply(mk_rule("np-2", "r-ns-prod"));

    assert_eq!(cache.rules("np-1").len(), 2);
    assert_eq!(cache.rules("np-2").len(), 1);
    assert!(cache.rules("np-3").is_empty());

    let rule = cache.rule("np-1", "R-NS-PROD").expect("rule must be indexed");
    assert_eq!(rule.spec.policy, "np-1");

    IndexClusterResource::<Rule>::delete(&mut *index.write(), "np-1.r-ns-prod".to_string());
    assert!(cache.rule("np-1", "r-ns-prod").is_none());
    assert!(cache.rule("np-2", "r-ns-prod").is_some());

    IndexClusterResource::<Rule>::delete(&mut *index.write(), "np-1.r-ns-dev".to_string());
    assert!(cache.rules("np-1").is_empty());
    assert!(index.read().rules.get("np-1").is_none());
}

#[test]
fn reapplying_a_rule_replaces_it() {
    let index = Index::shared();
    let cache = Cache::new(index.clone());

    index.write().apply(mk_rule("np-1", "r"));
    let mut rule = mk_rule("np-1", "r");
    rule.spec.matches.namespaces = vec!["prod".to_string()];
    index.write().apply(rule);

    let rules = cache.rules("np-1");
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].spec.matches.namespaces, vec!["prod".to_string()]);
}

#[test]
fn reset_drops_removed_resources() {
    let index = Index::shared();
    index.write().apply(mk_rule("np-1", "a"));
    index.write().apply(mk_rule("np-1", "b"));

    let removed = Some("np-1.a".to_string()).into_iter().collect();
    IndexClusterResource::<Rule>::reset(&mut *index.write(), vec![mk_rule("np-1", "b")], removed);

    let cache = Cache::new(index.clone());
    assert!(cache.rule("np-1", "a").is_none());
    assert!(cache.rule("np-1", "b").is_some());
}

#[test]
fn ignores_incomplete_rules() {
    let index = Index::shared();
    let mut rule = mk_rule("np-1", "r");
    rule.spec.policy = String::new();
    index.write().apply(rule);
    assert!(index.read().is_empty());
}

fn mk_template(name: &str) -> PolicyTemplate {
    PolicyTemplate {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: PolicyTemplateSpec {
            name: name.to_string(),
            description: String::new(),
            content: PolicyTemplateContent::default(),
        },
    }
}

fn mk_policy(name: &str) -> Policy {
    Policy {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: PolicySpec {
            name: name.to_string(),
            policy_template: "k8srequiredlabels".to_string(),
            provider: "gatekeeper".to_string(),
            description: String::new(),
            content: PolicyContent::default(),
        },
        status: None,
    }
}

fn mk_rule(policy: &str, name: &str) -> Rule {
    Rule {
        metadata: ObjectMeta {
            name: Some(format!("{policy}.{name}")),
            labels: Some(btreemap! { POLICY_LABEL.to_string() => policy.to_string() }),
            ..Default::default()
        },
        spec: RuleSpec {
            name: name.to_string(),
            policy: policy.to_string(),
            provider: "gatekeeper".to_string(),
            description: String::new(),
            matches: Match::default(),
            parameters: None,
        },
        status: None,
    }
}
