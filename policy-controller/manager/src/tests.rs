//! Manager tests run against the real watch index, fed by an in-memory API that can hold back
//! watch events to simulate cache lag, and a provider that records its calls.


use crate::{Config, Metrics, Operator, Stores};
use admission_policy_controller_core::{
    k8s::{
        Names, ObjectMeta, Parameters, Policy, PolicyContent, PolicyContentSpec, PolicySpec,
        PolicyTemplate, PolicyTemplateContent, PolicyTemplateContentTarget, PolicyTemplateSpec,
        Resource, Rule, Stateful, Validation,
    },
    store::{StoreError, Writer},
    CompiledConstraint, ConstraintScope, Provider, ProviderError, ProviderRegistry,
};
use admission_policy_controller_k8s_index::{Cache, Index, SharedIndex};
use kubert::index::IndexClusterResource;
use parking_lot::Mutex;
use serde_json::json;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

pub(crate) fn target(provider: &str, expression: &str) -> PolicyTemplateContentTarget {
    PolicyTemplateContentTarget {
        target: "admission.k8s.gatekeeper.sh".to_string(),
        provider: provider.to_string(),
        expression: expression.to_string(),
        import: vec![],
    }
}

pub(crate) fn mk_template(name: &str, targets: Vec<PolicyTemplateContentTarget>) -> PolicyTemplate {
    PolicyTemplate {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: PolicyTemplateSpec {
            name: name.to_string(),
            description: format!("{name} template"),
            content: PolicyTemplateContent {
                spec: PolicyContentSpec {
                    names: Names {
                        name: "K8sRequiredLabels".to_string(),
                        short_names: vec![],
                    },
                    parameters: Parameters {
                        validation: Some(Validation {
                            open_api_v3_schema: Some(json!({
                                "type": "object",
                                "properties": {
                                    "labels": {
                                        "type": "array",
                                        "items": { "type": "string" },
                                    },
                                },
                            })),
                            legacy_schema: None,
                        }),
                        values: None,
                    },
                },
                targets,
            },
        },
    }
}

/// A template whose constraints are of `kind`.
pub(crate) fn mk_template_of_kind(
    name: &str,
    kind: &str,
    targets: Vec<PolicyTemplateContentTarget>,
) -> PolicyTemplate {
    let mut template = mk_template(name, targets);
    template.spec.content.spec.names.name = kind.to_string();
    template
}

pub(crate) fn mk_policy(name: &str, provider: &str) -> Policy {
    Policy::new(
        name,
        PolicySpec {
            name: name.to_string(),
            policy_template: "baseline-no-privileged".to_string(),
            provider: provider.to_string(),
            description: String::new(),
            content: PolicyContent {
                spec: PolicyContentSpec {
                    names: Names {
                        name: "K8sRequiredLabels".to_string(),
                        short_names: vec![],
                    },
                    parameters: Parameters::default(),
                },
                targets: vec![],
            },
        },
    )
}

// === Harness ===

/// An operator wired to an in-memory API and recording providers named `gatekeeper` and
/// `kyverno`.
pub(crate) struct Harness {
    pub operator: Operator,
    pub api: MemoryApi,
    pub provider: FakeProvider,
    pub kyverno: FakeProvider,
    pub metrics: Metrics,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();

        let api = MemoryApi::default();
        api.apply_template(mk_template(
            "baseline-no-privileged",
            vec![target("gatekeeper", "package k8srequiredlabels")],
        ));

        let provider = FakeProvider::default();
        let kyverno = FakeProvider::default();
        let providers = ProviderRegistry::builder()
            .with_provider("gatekeeper", provider.clone())
            .with_provider("kyverno", kyverno.clone())
            .build();
        let metrics = Metrics::default();
        let stores = Stores {
            reader: Arc::new(Cache::new(api.index.clone())),
            policies: Arc::new(api.clone()),
            rules: Arc::new(api.clone()),
        };
        let operator = Operator::new(stores, providers, config, metrics.clone());
        Self {
            operator,
            api,
            provider,
            kyverno,
            metrics,
        }
    }
}

// === MemoryApi ===

/// The authoritative state of the API server. Every write produces a watch event that is
/// applied to the index immediately, or queued while lagging.
#[derive(Clone, Default)]
pub(crate) struct MemoryApi {
    index: SharedIndex,
    state: Arc<Mutex<ApiState>>,
    lagging: Arc<AtomicBool>,
    version: Arc<AtomicU64>,
    conflicts: Arc<AtomicUsize>,
}

type Event = Box<dyn FnOnce(&mut Index) + Send>;

#[derive(Default)]
pub(crate) struct ApiState {
    policies: BTreeMap<String, Policy>,
    rules: BTreeMap<String, Rule>,
    pending: Vec<Event>,
    log: Vec<String>,
}

pub(crate) trait Stored:
    Clone + Resource<DynamicType = ()> + Stateful + Send + Sync + 'static
{
    fn objects(state: &mut ApiState) -> &mut BTreeMap<String, Self>;

    fn watch_apply(self) -> Event;

    fn watch_delete(name: String) -> Event;
}

impl Stored for Policy {
    fn objects(state: &mut ApiState) -> &mut BTreeMap<String, Self> {
        &mut state.policies
    }

    fn watch_apply(self) -> Event {
        Box::new(move |idx: &mut Index| idx.apply(self))
    }

    fn watch_delete(name: String) -> Event {
        Box::new(move |idx: &mut Index| IndexClusterResource::<Policy>::delete(idx, name))
    }
}

impl Stored for Rule {
    fn objects(state: &mut ApiState) -> &mut BTreeMap<String, Self> {
        &mut state.rules
    }

    fn watch_apply(self) -> Event {
        Box::new(move |idx: &mut Index| idx.apply(self))
    }

    fn watch_delete(name: String) -> Event {
        Box::new(move |idx: &mut Index| IndexClusterResource::<Rule>::delete(idx, name))
    }
}

impl MemoryApi {
    pub fn apply_template(&self, template: PolicyTemplate) {
        self.index.write().apply(template);
    }

    /// Holds watch events back until [`MemoryApi::sync`].
    pub fn lag(&self) {
        self.lagging.store(true, Ordering::SeqCst);
    }

    pub fn sync(&self) {
        self.lagging.store(false, Ordering::SeqCst);
        let pending = std::mem::take(&mut self.state.lock().pending);
        let mut index = self.index.write();
        for event in pending {
            event(&mut index);
        }
    }

    /// Makes the next `n` replace calls fail as though another writer got there first.
    pub fn inject_conflicts(&self, n: usize) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    pub fn policy(&self, name: &str) -> Option<Policy> {
        self.state.lock().policies.get(name).cloned()
    }

    pub fn rule(&self, name: &str) -> Option<Rule> {
        self.state.lock().rules.get(name).cloned()
    }

    pub fn policy_count(&self) -> usize {
        self.state.lock().policies.len()
    }

    /// Writes in the order the API received them.
    pub fn log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    fn publish(&self, state: &mut ApiState, event: Event) {
        if self.lagging.load(Ordering::SeqCst) {
            state.pending.push(event);
        } else {
            event(&mut self.index.write());
        }
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn write<K: Stored>(
        &self,
        resource: &K,
        update: impl FnOnce(&K, &mut K),
    ) -> Result<K, StoreError> {
        let name = resource.meta().name.clone().unwrap_or_default();
        let version = self.next_version();
        let mut state = self.state.lock();
        let current = K::objects(&mut state)
            .get_mut(&name)
            .ok_or(StoreError::NotFound)?;

        let injected = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            // Another writer updated the object first.
            current.meta_mut().resource_version = Some(version);
            return Err(StoreError::Conflict);
        }
        if current.meta().resource_version != resource.meta().resource_version {
            return Err(StoreError::Conflict);
        }

        update(resource, current);
        current.meta_mut().resource_version = Some(version);
        let written = current.clone();
        state.log.push(format!("update {} {name}", K::kind(&())));
        self.publish(&mut state, written.clone().watch_apply());
        Ok(written)
    }
}

#[async_trait::async_trait]
impl<K: Stored> Writer<K> for MemoryApi {
    async fn fetch(&self, name: &str) -> Result<Option<K>, StoreError> {
        Ok(K::objects(&mut self.state.lock()).get(name).cloned())
    }

    async fn create(&self, resource: &K) -> Result<K, StoreError> {
        let name = resource.meta().name.clone().unwrap_or_default();
        let version = self.next_version();
        let mut state = self.state.lock();
        if K::objects(&mut state).contains_key(&name) {
            return Err(StoreError::AlreadyExists);
        }

        let mut created = resource.clone();
        let meta = created.meta_mut();
        meta.uid = Some(format!("uid-{version}"));
        meta.resource_version = Some(version);
        K::objects(&mut state).insert(name.clone(), created.clone());
        state.log.push(format!("create {} {name}", K::kind(&())));
        self.publish(&mut state, created.clone().watch_apply());
        Ok(created)
    }

    async fn replace(&self, resource: &K) -> Result<K, StoreError> {
        // The status subresource is not changed by a replace.
        self.write(resource, |new, current| {
            let state = current.state();
            *current = new.clone();
            current.set_state(state);
        })
    }

    async fn replace_status(&self, resource: &K) -> Result<K, StoreError> {
        self.write(resource, |new, current| current.set_state(new.state()))
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if K::objects(&mut state).remove(name).is_none() {
            return Err(StoreError::NotFound);
        }
        state.log.push(format!("delete {} {name}", K::kind(&())));
        self.publish(&mut state, K::watch_delete(name.to_string()));
        Ok(())
    }
}

// === FakeProvider ===

#[derive(Clone, Default)]
pub(crate) struct FakeProvider(Arc<Mutex<FakeState>>);

#[derive(Default)]
struct FakeState {
    failure: Option<Failure>,
    calls: Vec<String>,
    registered: BTreeMap<String, ConstraintScope>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Failure {
    Unavailable,
    Invalid,
    Hang,
}

impl FakeProvider {
    pub fn fail(&self, failure: Failure) {
        self.0.lock().failure = Some(failure);
    }

    pub fn recover(&self) {
        self.0.lock().failure = None;
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().calls.clone()
    }

    /// Registered constraint instances by name. A remove only matches an instance of the same
    /// kind, as with a real provider.
    pub fn registered(&self) -> BTreeMap<String, ConstraintScope> {
        self.0.lock().registered.clone()
    }

    async fn check(&self, call: String) -> Result<(), ProviderError> {
        let failure = {
            let mut state = self.0.lock();
            state.calls.push(call);
            state.failure
        };
        match failure {
            None => Ok(()),
            Some(Failure::Unavailable) => Err(ProviderError::Unavailable(anyhow::anyhow!(
                "connection refused"
            ))),
            Some(Failure::Invalid) => Err(ProviderError::Invalid(anyhow::anyhow!(
                "rego_parse_error"
            ))),
            Some(Failure::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }
}

#[async_trait::async_trait]
impl Provider for FakeProvider {
    async fn compile_constraint(
        &self,
        content: &PolicyContent,
    ) -> Result<CompiledConstraint, ProviderError> {
        let kind = content.spec.names.name.clone();
        self.check(format!("compile {kind}")).await?;
        Ok(CompiledConstraint {
            kind,
            template: json!({ "targets": content.targets.len() }),
        })
    }

    async fn upsert(
        &self,
        _: &CompiledConstraint,
        scope: &ConstraintScope,
    ) -> Result<(), ProviderError> {
        self.check(format!("upsert {}", scope.name())).await?;
        self.0.lock().registered.insert(scope.name(), scope.clone());
        Ok(())
    }

    async fn remove(&self, scope: &ConstraintScope) -> Result<(), ProviderError> {
        self.check(format!("remove {}", scope.name())).await?;
        let mut state = self.0.lock();
        let name = scope.name();
        if state.registered.get(&name).is_some_and(|s| s.kind == scope.kind) {
            state.registered.remove(&name);
        }
        Ok(())
    }
}
