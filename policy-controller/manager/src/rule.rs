use crate::{
    dispatch::{rule_scope, Dispatch},
    translate,
    write::{self, store_error, Part},
    Metrics, Stores,
};
use admission_policy_controller_core::{
    api::{Outcome, PostRule, RuleDetail},
    k8s::{Policy, ResourceExt, Rule, Stateful},
    store::StoreError,
    DeleteStep, Error, ListResult, Query, Result, State,
};
use std::sync::Arc;
use tracing::{info_span, Instrument};

/// Manages the rules under each policy.
#[derive(Clone)]
pub struct RuleManager {
    stores: Stores,
    dispatch: Dispatch,
    metrics: Metrics,
}

impl RuleManager {
    pub(crate) fn new(stores: Stores, dispatch: Dispatch, metrics: Metrics) -> Self {
        Self {
            stores,
            dispatch,
            metrics,
        }
    }

    pub fn get(&self, policy: &str, rule: &str) -> Result<RuleDetail> {
        let (_, rule) = self.lookup(policy, rule)?;
        Ok(RuleDetail::from(&*rule))
    }

    pub fn list(&self, policy: &str, query: &Query) -> Result<ListResult<RuleDetail>> {
        let parent = self.parent(policy)?;
        let rules = self.stores.reader.rules(&parent.name_any());
        Ok(query.apply(rules).map(|r| RuleDetail::from(&*r)))
    }

    pub async fn create(&self, policy: &str, post: PostRule) -> Result<Outcome<RuleDetail>> {
        let span = info_span!("create_rule", %policy, rule = %post.name);
        async move {
            let parent = self.parent(policy)?;
            if parent.metadata.deletion_timestamp.is_some() {
                tracing::debug!("Policy is being deleted");
                return Err(Error::PolicyNotFound(parent.name_any()));
            }
            let policy = parent.name_any();
            post.validate(&policy)?;

            let mut rule = translate::build_rule(&parent, &post)?;
            let rule_name = rule.spec.name.clone();
            let already_exists = || Error::RuleAlreadyExists {
                policy: policy.clone(),
                rule: rule_name.clone(),
            };
            if self.stores.reader.rule(&policy, &rule_name).is_some() {
                return Err(already_exists());
            }

            // Persist inactive first so that an interrupted activation leaves nothing registered
            // without a resource that records it.
            let desired = rule.state();
            rule.set_state(State::Inactive);
            let created = match self.stores.rules.create(&rule).await {
                Ok(created) => created,
                Err(StoreError::AlreadyExists) => return Err(already_exists()),
                Err(error) => return Err(store_error(error)),
            };
            tracing::info!("Created rule");

            let created = if desired == State::Active {
                self.activate(&parent, created).await?
            } else {
                created
            };
            Ok(Outcome::new(RuleDetail::from(&created)))
        }
        .instrument(span)
        .await
    }

    pub async fn update(
        &self,
        policy: &str,
        rule: &str,
        post: PostRule,
    ) -> Result<Outcome<RuleDetail>> {
        let span = info_span!("update_rule", %policy, %rule);
        async move {
            let (parent, current) = self.lookup(policy, rule)?;
            let policy = parent.name_any();
            if !post.name.is_empty() && !post.name.eq_ignore_ascii_case(&current.spec.name) {
                return Err(Error::invalid(format_args!(
                    "rule name {} does not match {}",
                    post.name, current.spec.name
                )));
            }
            let post = PostRule {
                name: current.spec.name.clone(),
                ..post
            };
            post.validate(&policy)?;

            let desired = post.state.unwrap_or_else(|| current.state());
            let translated = translate::build_rule(&parent, &post)?;
            let updated = write::update(
                &*self.stores.rules,
                &self.metrics,
                "rule",
                &current.name_any(),
                (*current).clone(),
                Part::Spec,
                || not_found(&policy, &current.spec.name),
                |r| r.spec = translated.spec.clone(),
            )
            .await?;
            tracing::info!("Updated rule");

            let updated = match (updated.state(), desired) {
                (_, State::Active) => self.activate(&parent, updated).await?,
                (State::Active, State::Inactive) => self.deactivate(&parent, updated).await?,
                (State::Inactive, State::Inactive) => updated,
            };
            Ok(Outcome::new(RuleDetail::from(&updated)))
        }
        .instrument(span)
        .await
    }

    pub async fn delete(&self, policy: &str, rule: &str) -> Result<()> {
        let span = info_span!("delete_rule", %policy, %rule);
        async move {
            let (parent, rule) = self.lookup(policy, rule)?;
            if !self.remove(&parent, &rule).await? {
                return Err(not_found(&parent.name_any(), &rule.spec.name));
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Deregisters `rule` if it is active and deletes it. Returns false if the resource was
    /// already gone, so that repeated cascading deletes succeed.
    pub(crate) async fn remove(&self, parent: &Policy, rule: &Rule) -> Result<bool> {
        let name = rule.name_any();
        if rule.state() == State::Active {
            self.dispatch
                .deregister(&parent.spec.provider, &rule_scope(parent, rule))
                .await
                .map_err(Error::delete_step(&name, DeleteStep::DeregisterConstraint))?;
        }
        match self.stores.rules.delete(&name).await {
            Ok(()) => {
                tracing::info!(rule = %name, "Deleted rule");
                Ok(true)
            }
            Err(StoreError::NotFound) => Ok(false),
            Err(error) => Err(Error::delete_step(&name, DeleteStep::DeleteResource)(
                store_error(error),
            )),
        }
    }

    /// Registers the active `rules` again with the current content of `parent`.
    pub(crate) async fn reregister(&self, parent: &Policy, rules: &[Arc<Rule>]) -> Result<()> {
        for rule in rules.iter().filter(|r| r.state() == State::Active) {
            self.dispatch
                .register(
                    &parent.spec.provider,
                    &parent.spec.content,
                    &rule_scope(parent, rule),
                )
                .await?;
        }
        Ok(())
    }

    async fn activate(&self, parent: &Policy, rule: Rule) -> Result<Rule> {
        self.dispatch
            .register(
                &parent.spec.provider,
                &parent.spec.content,
                &rule_scope(parent, &rule),
            )
            .await?;
        self.set_state(parent, rule, State::Active).await
    }

    async fn deactivate(&self, parent: &Policy, rule: Rule) -> Result<Rule> {
        self.dispatch
            .deregister(&parent.spec.provider, &rule_scope(parent, &rule))
            .await?;
        self.set_state(parent, rule, State::Inactive).await
    }

    async fn set_state(&self, parent: &Policy, rule: Rule, state: State) -> Result<Rule> {
        if rule.state() == state {
            return Ok(rule);
        }
        let policy = parent.name_any();
        let name = rule.name_any();
        let rule_name = rule.spec.name.clone();
        let rule = write::update(
            &*self.stores.rules,
            &self.metrics,
            "rule",
            &name,
            rule,
            Part::Status,
            || not_found(&policy, &rule_name),
            |r| r.set_state(state),
        )
        .await?;
        tracing::info!(%state, "Rule state changed");
        Ok(rule)
    }

    /// Looks up a policy. Missing parents are reported before missing rules.
    fn parent(&self, policy: &str) -> Result<Arc<Policy>> {
        self.stores
            .reader
            .policy(policy)
            .ok_or_else(|| Error::PolicyNotFound(policy.to_lowercase()))
    }

    fn lookup(&self, policy: &str, rule: &str) -> Result<(Arc<Policy>, Arc<Rule>)> {
        let parent = self.parent(policy)?;
        let rule = self
            .stores
            .reader
            .rule(&parent.name_any(), rule)
            .ok_or_else(|| not_found(&parent.name_any(), rule))?;
        Ok((parent, rule))
    }
}

fn not_found(policy: &str, rule: &str) -> Error {
    Error::RuleNotFound {
        policy: policy.to_string(),
        rule: rule.to_lowercase(),
    }
}
