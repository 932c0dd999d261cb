//! # Kubernetes API Store
//!
//! [`ObjectStore`] over `kube::Api`. Status writes are merge patches that
//! carry `metadata.resourceVersion`, so the API server rejects stale writes
//! with 409 just like a full replace would.

use async_trait::async_trait;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::debug;

use super::{ObjectStore, StoreError, StoreResult};
use crate::constants::FIELD_MANAGER;

type ApiFor<K> = fn(Client, Option<&str>) -> Api<K>;

/// Store for one resource kind backed by the API server
pub struct ApiStore<K> {
    client: Client,
    api_for: ApiFor<K>,
}

impl<K> Debug for ApiStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiStore")
            .field("kind", &std::any::type_name::<K>())
            .finish_non_exhaustive()
    }
}

impl<K> ApiStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    pub fn namespaced(client: Client) -> Self {
        Self {
            client,
            api_for: |client, namespace| match namespace {
                Some(ns) => Api::namespaced(client, ns),
                None => Api::all(client),
            },
        }
    }
}

impl<K> ApiStore<K>
where
    K: Resource<DynamicType = (), Scope = ClusterResourceScope>,
{
    pub fn cluster(client: Client) -> Self {
        Self {
            client,
            api_for: |client, _| Api::all(client),
        }
    }
}

fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).into_owned()
}

fn key_of(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}/{name}"),
        None => name.to_string(),
    }
}

fn store_error(err: kube::Error, kind: String, key: String) -> StoreError {
    match &err {
        kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound { kind, key },
        kube::Error::Api(api_err) if api_err.code == 409 && api_err.reason == "AlreadyExists" => {
            StoreError::AlreadyExists { kind, key }
        }
        kube::Error::Api(api_err) if api_err.code == 409 => StoreError::Conflict { kind, key },
        _ => StoreError::Api(format!("{kind} {key}: {err}")),
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..PostParams::default()
    }
}

#[async_trait]
impl<K> ObjectStore<K> for ApiStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, namespace: Option<&str>, name: &str) -> StoreResult<Option<K>> {
        (self.api_for)(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .map_err(|e| store_error(e, kind_of::<K>(), key_of(namespace, name)))
    }

    async fn list(&self, namespace: Option<&str>, label_selector: Option<&str>) -> StoreResult<Vec<K>> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = (self.api_for)(self.client.clone(), namespace)
            .list(&params)
            .await
            .map_err(|e| store_error(e, kind_of::<K>(), key_of(namespace, "*")))?;
        Ok(list.items)
    }

    async fn create(&self, obj: &K) -> StoreResult<K> {
        let namespace = obj.namespace();
        let name = obj.name_any();
        debug!("Creating {} {}", kind_of::<K>(), key_of(namespace.as_deref(), &name));
        (self.api_for)(self.client.clone(), namespace.as_deref())
            .create(&post_params(), obj)
            .await
            .map_err(|e| store_error(e, kind_of::<K>(), key_of(namespace.as_deref(), &name)))
    }

    async fn replace(&self, obj: &K) -> StoreResult<K> {
        let namespace = obj.namespace();
        let name = obj.name_any();
        (self.api_for)(self.client.clone(), namespace.as_deref())
            .replace(&name, &post_params(), obj)
            .await
            .map_err(|e| store_error(e, kind_of::<K>(), key_of(namespace.as_deref(), &name)))
    }

    async fn replace_status(&self, obj: &K) -> StoreResult<K> {
        let namespace = obj.namespace();
        let name = obj.name_any();
        let key = key_of(namespace.as_deref(), &name);
        let value = serde_json::to_value(obj)
            .map_err(|e| StoreError::Api(format!("{} {key}: {e}", kind_of::<K>())))?;
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": value.get("status").cloned().unwrap_or(serde_json::Value::Null),
        });
        (self.api_for)(self.client.clone(), namespace.as_deref())
            .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| store_error(e, kind_of::<K>(), key))
    }

    async fn delete(&self, namespace: Option<&str>, name: &str) -> StoreResult<bool> {
        match (self.api_for)(self.client.clone(), namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Ok(false),
            Err(e) => Err(store_error(e, kind_of::<K>(), key_of(namespace, name))),
        }
    }
}
