use admission_policy_controller_core::{
    api::PostRule,
    k8s::{
        rule::{resource_name, POLICY_LABEL},
        Match, Policy, Resource, ResourceExt, Rule, RuleSpec, Stateful,
    },
    Error, Result,
};

/// Builds a rule under `parent` from `post`.
///
/// The rule inherits the parent's provider. It is labelled with the parent's name and, when the
/// parent has been persisted, owned by it so that the API server collects rules whose parent
/// disappears.
pub fn build_rule(parent: &Policy, post: &PostRule) -> Result<Rule> {
    let policy = parent.name_any();
    if !post.provider.is_empty() && post.provider != parent.spec.provider {
        return Err(Error::invalid(format_args!(
            "rule provider {} does not match policy provider {}",
            post.provider, parent.spec.provider
        )));
    }

    let name = post.name.to_lowercase();
    let mut rule = Rule::new(
        &resource_name(&policy, &name),
        RuleSpec {
            name,
            policy: policy.clone(),
            provider: parent.spec.provider.clone(),
            description: post.description.clone(),
            matches: Match {
                namespaces: post.namespaces(),
            },
            parameters: post.parameters()?,
        },
    );
    rule.labels_mut().insert(POLICY_LABEL.to_string(), policy);
    if let Some(owner) = parent.controller_owner_ref(&()) {
        rule.owner_references_mut().push(owner);
    }
    rule.set_state(post.state.unwrap_or_default());
    Ok(rule)
}
