use crate::{
    dispatch::{policy_scope, Dispatch},
    translate::{self, Translated},
    write::{self, store_error, Part},
    Metrics, RuleManager, Stores,
};
use admission_policy_controller_core::{
    api::{Outcome, PolicyDetail, PostPolicy},
    k8s::{Policy, ResourceExt, Stateful},
    store::StoreError,
    validation::SchemaValidator,
    DeleteStep, Error, ListResult, Query, Result, State,
};
use std::sync::Arc;
use tracing::{info_span, Instrument};

/// Manages policies and their registration with providers.
#[derive(Clone)]
pub struct PolicyManager {
    stores: Stores,
    dispatch: Dispatch,
    validator: Arc<dyn SchemaValidator>,
    metrics: Metrics,
    allow_empty: bool,
    rules: RuleManager,
}

impl PolicyManager {
    pub(crate) fn new(
        stores: Stores,
        dispatch: Dispatch,
        validator: Arc<dyn SchemaValidator>,
        metrics: Metrics,
        allow_empty: bool,
        rules: RuleManager,
    ) -> Self {
        Self {
            stores,
            dispatch,
            validator,
            metrics,
            allow_empty,
            rules,
        }
    }

    /// Describes a policy, listing only the rules that apply to `namespace` when it is set.
    pub fn get(&self, name: &str, namespace: Option<&str>) -> Result<PolicyDetail> {
        let policy = self.lookup(name)?;
        let rules = self.stores.reader.rules(&policy.name_any());
        Ok(PolicyDetail::new(
            &policy,
            rules.iter().map(|r| &**r),
            namespace,
        ))
    }

    pub fn list(&self, query: &Query) -> ListResult<PolicyDetail> {
        query.apply(self.stores.reader.policies()).map(|policy| {
            let rules = self.stores.reader.rules(&policy.name_any());
            PolicyDetail::new(&policy, rules.iter().map(|r| &**r), None)
        })
    }

    /// Builds a policy from its template and persists it.
    ///
    /// The policy is always persisted inactive. If activation was requested, the constraint is
    /// then registered with the provider and the policy marked active. A failed activation
    /// leaves the inactive policy in place and returns the error.
    pub async fn create(&self, post: PostPolicy) -> Result<Outcome<PolicyDetail>> {
        let span = info_span!(
            "create_policy",
            policy = %post.name,
            template = %post.policy_template,
            provider = %post.provider,
        );
        async move {
            post.validate()?;
            let Translated {
                mut policy,
                warnings,
            } = self.translate(&post)?;
            let name = policy.name_any();
            if self.stores.reader.policy(&name).is_some() {
                return Err(Error::PolicyAlreadyExists(name));
            }

            let desired = policy.state();
            policy.set_state(State::Inactive);
            let created = match self.stores.policies.create(&policy).await {
                Ok(created) => created,
                Err(StoreError::AlreadyExists) => return Err(Error::PolicyAlreadyExists(name)),
                Err(error) => return Err(store_error(error)),
            };
            tracing::info!(%name, "Created policy");
            for warning in &warnings {
                tracing::warn!(%name, %warning, "Policy created with a warning");
            }

            let created = if desired == State::Active {
                self.activate(created).await?
            } else {
                created
            };
            Ok(Outcome::new(PolicyDetail::new(&created, None, None)).with_warnings(warnings))
        }
        .instrument(span)
        .await
    }

    /// Rebuilds a policy from its (possibly changed) template, provider and parameters.
    ///
    /// The new spec is written first with the current state, and the provider is only called once
    /// the write succeeds. A policy that moves to another provider or constraint kind has its old
    /// constraint removed and is marked inactive before the requested state is applied. An active
    /// policy has its constraint, and those of its active rules, re-registered with the new
    /// content.
    pub async fn update(&self, name: &str, post: PostPolicy) -> Result<Outcome<PolicyDetail>> {
        let span = info_span!("update_policy", policy = %name);
        async move {
            let current = self.lookup(name)?;
            let name = current.name_any();
            if !post.name.is_empty() && post.name.to_lowercase() != name {
                return Err(Error::invalid(format_args!(
                    "policy name {} does not match {name}",
                    post.name
                )));
            }
            let post = PostPolicy {
                name: current.spec.name.clone(),
                ..post
            };
            post.validate()?;

            let desired = post.state.unwrap_or_else(|| current.state());
            let Translated {
                policy: translated,
                warnings,
            } = self.translate(&post)?;

            // Rule constraints are registered under the policy's provider and kind.
            let old_scope = policy_scope(&current);
            let moved = current.spec.provider != translated.spec.provider
                || old_scope.kind != policy_scope(&translated).kind;
            let rules = self.stores.reader.rules(&name);
            if moved && !rules.is_empty() {
                return Err(Error::invalid(format_args!(
                    "the provider or constraint kind of policy {name} cannot change while it \
                     has rules"
                )));
            }

            let updated = write::update(
                &*self.stores.policies,
                &self.metrics,
                "policy",
                &name,
                (*current).clone(),
                Part::Spec,
                || Error::PolicyNotFound(name.clone()),
                |p| p.spec = translated.spec.clone(),
            )
            .await?;
            tracing::info!("Updated policy");

            // The old constraint can no longer be reached through the new spec.
            let updated = if moved && updated.state() == State::Active {
                let removed = self
                    .dispatch
                    .deregister(&current.spec.provider, &old_scope)
                    .await;
                let updated = self.set_state(updated, State::Inactive).await?;
                removed?;
                updated
            } else {
                updated
            };

            let updated = match (updated.state(), desired) {
                (_, State::Active) => self.activate(updated).await?,
                (State::Active, State::Inactive) => self.deactivate(updated).await?,
                (State::Inactive, State::Inactive) => updated,
            };
            if updated.state() == State::Active {
                self.rules.reregister(&updated, &rules).await?;
            }
            Ok(Outcome::new(PolicyDetail::new(
                &updated,
                rules.iter().map(|r| &**r),
                None,
            ))
            .with_warnings(warnings))
        }
        .instrument(span)
        .await
    }

    /// Deletes a policy after its rules and its registered constraint.
    ///
    /// Each step stops the delete on failure and is reported in the error. Steps that already
    /// completed are skipped or tolerated when the delete is repeated.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let span = info_span!("delete_policy", policy = %name);
        async move {
            let policy = self.lookup(name)?;
            let name = policy.name_any();

            for rule in self.stores.reader.rules(&name) {
                self.rules
                    .remove(&policy, &rule)
                    .await
                    .map_err(Error::delete_step(
                        &name,
                        DeleteStep::Rule(rule.spec.name.clone()),
                    ))?;
            }

            if policy.state() == State::Active {
                self.dispatch
                    .deregister(&policy.spec.provider, &policy_scope(&policy))
                    .await
                    .map_err(Error::delete_step(&name, DeleteStep::DeregisterConstraint))?;
            }

            match self.stores.policies.delete(&name).await {
                Ok(()) => {
                    tracing::info!("Deleted policy");
                    Ok(())
                }
                Err(StoreError::NotFound) => Err(Error::PolicyNotFound(name)),
                Err(error) => Err(Error::delete_step(&name, DeleteStep::DeleteResource)(
                    store_error(error),
                )),
            }
        }
        .instrument(span)
        .await
    }

    /// Checks that `post` names an enabled provider and an existing template, then translates it.
    pub(crate) fn translate(&self, post: &PostPolicy) -> Result<Translated> {
        self.dispatch.providers().require(&post.provider)?;
        let template = self
            .stores
            .reader
            .template(&post.policy_template)
            .ok_or_else(|| Error::TemplateNotFound(post.policy_template.clone()))?;
        translate::build_policy(&template, post, &*self.validator, self.allow_empty)
    }

    async fn activate(&self, policy: Policy) -> Result<Policy> {
        self.dispatch
            .register(
                &policy.spec.provider,
                &policy.spec.content,
                &policy_scope(&policy),
            )
            .await?;
        self.set_state(policy, State::Active).await
    }

    async fn deactivate(&self, policy: Policy) -> Result<Policy> {
        self.dispatch
            .deregister(&policy.spec.provider, &policy_scope(&policy))
            .await?;
        self.set_state(policy, State::Inactive).await
    }

    async fn set_state(&self, policy: Policy, state: State) -> Result<Policy> {
        if policy.state() == state {
            return Ok(policy);
        }
        let name = policy.name_any();
        let policy = write::update(
            &*self.stores.policies,
            &self.metrics,
            "policy",
            &name,
            policy,
            Part::Status,
            || Error::PolicyNotFound(name.clone()),
            |p| p.set_state(state),
        )
        .await?;
        tracing::info!(%state, "Policy state changed");
        Ok(policy)
    }

    fn lookup(&self, name: &str) -> Result<Arc<Policy>> {
        self.stores
            .reader
            .policy(name)
            .ok_or_else(|| Error::PolicyNotFound(name.to_lowercase()))
    }
}
