use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct Metrics {
    provider_calls: Family<ProviderCallLabels, Counter>,
    store_conflicts: Family<ConflictLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ProviderCallLabels {
    provider: String,
    operation: &'static str,
    result: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ConflictLabels {
    kind: &'static str,
}

// === impl Metrics ===

impl Metrics {
    pub fn register(reg: &mut Registry) -> Self {
        let provider_calls = Family::default();
        reg.register(
            "provider_calls",
            "Count of calls to policy providers by operation and result",
            provider_calls.clone(),
        );

        let store_conflicts = Family::default();
        reg.register(
            "store_conflicts",
            "Count of writes retried after a resource version conflict",
            store_conflicts.clone(),
        );

        Self {
            provider_calls,
            store_conflicts,
        }
    }

    pub(crate) fn provider_call(
        &self,
        provider: &str,
        operation: &'static str,
        result: &'static str,
    ) {
        self.provider_calls
            .get_or_create(&ProviderCallLabels {
                provider: provider.to_string(),
                operation,
                result,
            })
            .inc();
    }

    pub(crate) fn store_conflict(&self, kind: &'static str) {
        self.store_conflicts
            .get_or_create(&ConflictLabels { kind })
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn provider_calls(
        &self,
        provider: &str,
        operation: &'static str,
        result: &'static str,
    ) -> u64 {
        self.provider_calls
            .get_or_create(&ProviderCallLabels {
                provider: provider.to_string(),
                operation,
                result,
            })
            .get()
    }

    #[cfg(test)]
    pub(crate) fn store_conflicts(&self, kind: &'static str) -> u64 {
        self.store_conflicts
            .get_or_create(&ConflictLabels { kind })
            .get()
    }
}
