use crate::{dispatch::Dispatch, Config, Metrics, PolicyManager, RuleManager, Stores};
use admission_policy_controller_core::{
    api::{Outcome, PolicyDetail, PolicyTemplateDetail, PostPolicy, PostRule, RuleDetail},
    k8s::{PolicySpec, RuleSpec},
    store::Reader,
    validation::{validate_label, JsonSchemaValidator, SchemaValidator},
    Error, ListResult, ProviderRegistry, Query, Result,
};
use std::sync::Arc;

/// The operations offered to the API layer.
#[derive(Clone)]
pub struct Operator {
    reader: Arc<dyn Reader>,
    providers: ProviderRegistry,
    allow_empty_policies: bool,
    policies: PolicyManager,
    rules: RuleManager,
}

impl Operator {
    pub fn new(
        stores: Stores,
        providers: ProviderRegistry,
        config: Config,
        metrics: Metrics,
    ) -> Self {
        let validator = Arc::new(JsonSchemaValidator);
        Self::with_validator(stores, providers, config, metrics, validator)
    }

    pub fn with_validator(
        stores: Stores,
        providers: ProviderRegistry,
        config: Config,
        metrics: Metrics,
        validator: Arc<dyn SchemaValidator>,
    ) -> Self {
        if providers.is_empty() {
            tracing::warn!("No providers are enabled; policies cannot be created");
        }
        let dispatch = Dispatch::new(providers.clone(), config.provider_timeout, metrics.clone());
        let rules = RuleManager::new(stores.clone(), dispatch.clone(), metrics.clone());
        let policies = PolicyManager::new(
            stores.clone(),
            dispatch,
            validator,
            metrics,
            config.allow_empty_policies,
            rules.clone(),
        );
        Self {
            reader: stores.reader,
            providers,
            allow_empty_policies: config.allow_empty_policies,
            policies,
            rules,
        }
    }

    pub fn policies(&self) -> &PolicyManager {
        &self.policies
    }

    pub fn rules(&self) -> &RuleManager {
        &self.rules
    }

    pub fn list_policy_templates(&self, query: &Query) -> ListResult<PolicyTemplateDetail> {
        query
            .apply(self.reader.templates())
            .map(|t| PolicyTemplateDetail::from(&*t))
    }

    pub fn get_policy_template(&self, name: &str) -> Result<PolicyTemplateDetail> {
        self.reader
            .template(name)
            .map(|t| PolicyTemplateDetail::from(&*t))
            .ok_or_else(|| Error::TemplateNotFound(name.to_string()))
    }

    pub fn list_policies(&self, query: &Query) -> ListResult<PolicyDetail> {
        self.policies.list(query)
    }

    pub fn get_policy(&self, name: &str, namespace: Option<&str>) -> Result<PolicyDetail> {
        self.policies.get(name, namespace)
    }

    pub async fn create_policy(&self, post: PostPolicy) -> Result<Outcome<PolicyDetail>> {
        self.policies.create(post).await
    }

    pub async fn update_policy(
        &self,
        name: &str,
        post: PostPolicy,
    ) -> Result<Outcome<PolicyDetail>> {
        self.policies.update(name, post).await
    }

    pub async fn delete_policy(&self, name: &str) -> Result<()> {
        self.policies.delete(name).await
    }

    pub fn list_rules(&self, policy: &str, query: &Query) -> Result<ListResult<RuleDetail>> {
        self.rules.list(policy, query)
    }

    pub fn get_rule(&self, policy: &str, rule: &str) -> Result<RuleDetail> {
        self.rules.get(policy, rule)
    }

    pub async fn create_rule(&self, policy: &str, post: PostRule) -> Result<Outcome<RuleDetail>> {
        self.rules.create(policy, post).await
    }

    pub async fn update_rule(
        &self,
        policy: &str,
        rule: &str,
        post: PostRule,
    ) -> Result<Outcome<RuleDetail>> {
        self.rules.update(policy, rule, post).await
    }

    pub async fn delete_rule(&self, policy: &str, rule: &str) -> Result<()> {
        self.rules.delete(policy, rule).await
    }

    /// Checks a policy written directly to the cluster.
    pub fn check_policy(&self, spec: &PolicySpec) -> Result<()> {
        self.providers.require(&spec.provider)?;
        let template = self
            .reader
            .template(&spec.policy_template)
            .ok_or_else(|| Error::TemplateNotFound(spec.policy_template.clone()))?;
        if !self.allow_empty_policies && !template.spec.content.supports(&spec.provider) {
            return Err(Error::TemplateProviderMismatch {
                template: spec.policy_template.clone(),
                provider: spec.provider.clone(),
            });
        }
        Ok(())
    }

    /// Checks a rule written directly to the cluster.
    pub fn check_rule(&self, spec: &RuleSpec) -> Result<()> {
        let parent = self
            .reader
            .policy(&spec.policy)
            .ok_or_else(|| Error::PolicyNotFound(spec.policy.clone()))?;
        validate_label(&spec.name).map_err(Error::invalid)?;
        if spec.provider != parent.spec.provider {
            return Err(Error::invalid(format_args!(
                "rule provider {} does not match policy provider {}",
                spec.provider, parent.spec.provider
            )));
        }
        for ns in &spec.matches.namespaces {
            validate_label(ns).map_err(Error::invalid)?;
        }
        Ok(())
    }
}
