//! Access to the resource store.
//!
//! Reads are served from a watch-fed cache and are eventually consistent: a resource written by
//! one request may not yet be visible to the next. Writes go to the API and are serialized per
//! resource by resource-version compare-and-swap.

use crate::k8s::{Policy, PolicyTemplate, Rule};
use std::sync::Arc;

/// Cached, eventually consistent reads.
pub trait Reader: Send + Sync {
    fn template(&self, name: &str) -> Option<Arc<PolicyTemplate>>;

    fn templates(&self) -> Vec<Arc<PolicyTemplate>>;

    fn policy(&self, name: &str) -> Option<Arc<Policy>>;

    fn policies(&self) -> Vec<Arc<Policy>>;

    /// Looks up a rule by its parent policy's resource name and the rule's own name.
    fn rule(&self, policy: &str, rule: &str) -> Option<Arc<Rule>>;

    fn rules(&self, policy: &str) -> Vec<Arc<Rule>>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("resource not found")]
    NotFound,

    #[error("resource already exists")]
    AlreadyExists,

    #[error("resource version conflict")]
    Conflict,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Writes against the API for one resource kind. Resources are addressed by resource name.
#[async_trait::async_trait]
pub trait Writer<K>: Send + Sync {
    /// Reads the current object from the API, bypassing the cache.
    async fn fetch(&self, name: &str) -> Result<Option<K>, StoreError>;

    async fn create(&self, resource: &K) -> Result<K, StoreError>;

    /// Replaces the object's spec. Fails with [`StoreError::Conflict`] when the resource version
    /// is stale.
    async fn replace(&self, resource: &K) -> Result<K, StoreError>;

    /// Replaces the object's status, with the same concurrency semantics as `replace`.
    async fn replace_status(&self, resource: &K) -> Result<K, StoreError>;

    async fn delete(&self, name: &str) -> Result<(), StoreError>;
}
