//! Writes policies and rules through the Kubernetes API.
//!
//! Every write carries the resource version of the object it was derived from, so the API server
//! rejects writes based on a stale read with a conflict.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use admission_policy_controller_core::store::{StoreError, Writer};
use admission_policy_controller_k8s_api::{
    self as k8s, Api, Client, DeleteParams, ErrorResponse, Patch, PatchParams, PostParams,
    Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

/// A [`Writer`] backed by the API server for one cluster-scoped resource kind.
#[derive(Clone)]
pub struct ApiWriter<K> {
    api: Api<K>,
    field_manager: String,
}

/// How a 409 response is interpreted for the request that produced it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum OnConflict {
    AlreadyExists,
    Conflict,
}

// === impl ApiWriter ===

impl<K> ApiWriter<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + fmt::Debug,
{
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            api: Api::all(client),
            field_manager: field_manager.into(),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

impl<K> fmt::Debug for ApiWriter<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiWriter")
            .field("field_manager", &self.field_manager)
            .finish()
    }
}

#[async_trait::async_trait]
impl<K> Writer<K> for ApiWriter<K>
where
    K: Resource<DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + fmt::Debug
        + Send
        + Sync
        + 'static,
{
    async fn fetch(&self, name: &str) -> Result<Option<K>, StoreError> {
        self.api
            .get_opt(name)
            .await
            .map_err(|e| store_error(e, OnConflict::Conflict))
    }

    async fn create(&self, resource: &K) -> Result<K, StoreError> {
        let created = self
            .api
            .create(&self.post_params(), resource)
            .await
            .map_err(|e| store_error(e, OnConflict::AlreadyExists))?;
        tracing::debug!(name = %created.name_any(), kind = %K::kind(&()), "Created");
        Ok(created)
    }

    async fn replace(&self, resource: &K) -> Result<K, StoreError> {
        let name = resource.name_any();
        let replaced = self
            .api
            .replace(&name, &self.post_params(), resource)
            .await
            .map_err(|e| store_error(e, OnConflict::Conflict))?;
        tracing::debug!(%name, kind = %K::kind(&()), "Replaced");
        Ok(replaced)
    }

    async fn replace_status(&self, resource: &K) -> Result<K, StoreError> {
        let name = resource.name_any();
        let patch = status_patch(resource)?;
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        let patched = self
            .api
            .patch_status(&name, &params, &Patch::Merge(patch))
            .await
            .map_err(|e| store_error(e, OnConflict::Conflict))?;
        tracing::debug!(%name, kind = %K::kind(&()), "Updated status");
        Ok(patched)
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.api
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| store_error(e, OnConflict::Conflict))?;
        tracing::debug!(%name, kind = %K::kind(&()), "Deleted");
        Ok(())
    }
}

/// Builds a merge patch that replaces the resource's status. The patch carries the resource
/// version so that the API server rejects it if the object changed since it was read.
fn status_patch<K: Resource + Serialize>(resource: &K) -> Result<serde_json::Value, StoreError> {
    let mut value = serde_json::to_value(resource).map_err(anyhow::Error::from)?;
    let status = value
        .get_mut("status")
        .map(serde_json::Value::take)
        .unwrap_or_default();
    Ok(serde_json::json!({
        "metadata": {
            "resourceVersion": resource.meta().resource_version,
        },
        "status": status,
    }))
}

fn store_error(error: k8s::Error, on_conflict: OnConflict) -> StoreError {
    match error {
        k8s::Error::Api(ErrorResponse { code: 404, .. }) => StoreError::NotFound,
        k8s::Error::Api(ErrorResponse { code: 409, .. }) => match on_conflict {
            OnConflict::AlreadyExists => StoreError::AlreadyExists,
            OnConflict::Conflict => StoreError::Conflict,
        },
        error => StoreError::Other(error.into()),
    }
}
