//! # In-Memory Store
//!
//! Process-local [`ObjectStore`] with API-server-like semantics:
//!
//! - every write bumps `metadata.resourceVersion`; a write carrying a stale
//!   token fails with [`StoreError::Conflict`]
//! - `metadata.generation` starts at 1 and increments when anything outside
//!   `metadata`/`status` changes
//! - `replace` never touches status and `replace_status` never touches anything else
//! - deleting an object that still has finalizers only stamps
//!   `metadata.deletionTimestamp`; it is purged once a replace clears them

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard};

use super::{ObjectStore, StoreError, StoreResult};

type ObjectKey = (String, String);

struct Inner<K> {
    objects: BTreeMap<ObjectKey, K>,
    next_version: u64,
    held: BTreeSet<ObjectKey>,
}

/// In-memory store for one kind
pub struct MemoryStore<K> {
    inner: Mutex<Inner<K>>,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Inner {
                objects: BTreeMap::new(),
                next_version: 1,
                held: BTreeSet::new(),
            }),
        }
    }
}

impl<K> Debug for MemoryStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("kind", &std::any::type_name::<K>())
            .finish_non_exhaustive()
    }
}

fn object_key(namespace: Option<&str>, name: &str) -> ObjectKey {
    (namespace.unwrap_or_default().to_string(), name.to_string())
}

fn display_key(key: &ObjectKey) -> String {
    if key.0.is_empty() {
        key.1.clone()
    } else {
        format!("{}/{}", key.0, key.1)
    }
}

fn to_json<K: Serialize>(obj: &K) -> StoreResult<Value> {
    serde_json::to_value(obj).map_err(|e| StoreError::Api(e.to_string()))
}

fn from_json<K: DeserializeOwned>(value: Value) -> StoreResult<K> {
    serde_json::from_value(value).map_err(|e| StoreError::Api(e.to_string()))
}

/// Everything but `metadata` and `status`
fn content_of(value: &Value) -> Value {
    let mut content = value.clone();
    if let Some(map) = content.as_object_mut() {
        map.remove("metadata");
        map.remove("status");
    }
    content
}

fn set_metadata_field(value: &mut Value, field: &str, field_value: Value) {
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.insert(field.to_string(), field_value);
    }
}

fn metadata_field(value: &Value, field: &str) -> Value {
    value
        .get("metadata")
        .and_then(|m| m.get(field))
        .cloned()
        .unwrap_or(Value::Null)
}

/// `key=value[,key=value]` equality selector; unsupported terms never match
fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
            None => false,
        })
}

impl<K> MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner<K>>> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Api(format!("memory store poisoned: {e}")))
    }

    fn kind() -> String {
        std::any::type_name::<K>()
            .rsplit("::")
            .next()
            .unwrap_or("object")
            .to_string()
    }

    /// Make deletion of this object wait until [`MemoryStore::release`] is called,
    /// as if another controller's finalizer were still present
    pub fn hold(&self, namespace: Option<&str>, name: &str) {
        if let Ok(mut inner) = self.lock() {
            inner.held.insert(object_key(namespace, name));
        }
    }

    /// Drop a hold; the object is purged if it was already marked for deletion
    pub fn release(&self, namespace: Option<&str>, name: &str) {
        let Ok(mut inner) = self.lock() else {
            return;
        };
        let key = object_key(namespace, name);
        inner.held.remove(&key);
        let purge = inner.objects.get(&key).is_some_and(|obj| {
            obj.meta().deletion_timestamp.is_some() && obj.finalizers().is_empty()
        });
        if purge {
            inner.objects.remove(&key);
        }
    }

    /// Insert or overwrite an object without any concurrency checks.
    /// Used to seed fixtures and to play external actors in tests.
    pub fn upsert(&self, obj: K) -> StoreResult<K> {
        let mut inner = self.lock()?;
        let key = object_key(obj.meta().namespace.as_deref(), &obj.name_any());
        let version = inner.next_version;
        inner.next_version += 1;
        let mut value = to_json(&obj)?;
        if metadata_field(&value, "generation").is_null() {
            set_metadata_field(&mut value, "generation", Value::from(1));
        }
        if metadata_field(&value, "uid").is_null() {
            set_metadata_field(&mut value, "uid", Value::from(format!("uid-{version}")));
        }
        set_metadata_field(&mut value, "resourceVersion", Value::from(version.to_string()));
        let stored: K = from_json(value)?;
        inner.objects.insert(key, stored.clone());
        Ok(stored)
    }

    /// Snapshot of every stored object
    #[must_use]
    pub fn all(&self) -> Vec<K> {
        self.lock()
            .map(|inner| inner.objects.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn get_now(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        self.lock()
            .ok()
            .and_then(|inner| inner.objects.get(&object_key(namespace, name)).cloned())
    }

    #[must_use]
    pub fn contains(&self, namespace: Option<&str>, name: &str) -> bool {
        self.get_now(namespace, name).is_some()
    }

    fn check_version(stored: &K, incoming: &K, key: &ObjectKey) -> StoreResult<()> {
        match incoming.meta().resource_version.as_deref() {
            Some(rv) if Some(rv) != stored.meta().resource_version.as_deref() => {
                Err(StoreError::Conflict {
                    kind: Self::kind(),
                    key: display_key(key),
                })
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, namespace: Option<&str>, name: &str) -> StoreResult<Option<K>> {
        let inner = self.lock()?;
        Ok(inner.objects.get(&object_key(namespace, name)).cloned())
    }

    async fn list(&self, namespace: Option<&str>, label_selector: Option<&str>) -> StoreResult<Vec<K>> {
        let inner = self.lock()?;
        Ok(inner
            .objects
            .iter()
            .filter(|((ns, _), _)| namespace.is_none_or(|want| want == ns))
            .filter(|(_, obj)| label_selector.is_none_or(|sel| matches_selector(obj.labels(), sel)))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, obj: &K) -> StoreResult<K> {
        let mut inner = self.lock()?;
        let key = object_key(obj.meta().namespace.as_deref(), &obj.name_any());
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: Self::kind(),
                key: display_key(&key),
            });
        }
        let version = inner.next_version;
        inner.next_version += 1;
        let mut value = to_json(obj)?;
        set_metadata_field(&mut value, "resourceVersion", Value::from(version.to_string()));
        set_metadata_field(&mut value, "generation", Value::from(1));
        set_metadata_field(&mut value, "uid", Value::from(format!("uid-{version}")));
        let stored: K = from_json(value)?;
        inner.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace(&self, obj: &K) -> StoreResult<K> {
        let mut inner = self.lock()?;
        let key = object_key(obj.meta().namespace.as_deref(), &obj.name_any());
        let Some(stored) = inner.objects.get(&key) else {
            return Err(StoreError::NotFound {
                kind: Self::kind(),
                key: display_key(&key),
            });
        };
        Self::check_version(stored, obj, &key)?;

        let stored_value = to_json(stored)?;
        let mut value = to_json(obj)?;
        let generation = metadata_field(&stored_value, "generation").as_i64().unwrap_or(1);
        let generation = if content_of(&stored_value) == content_of(&value) {
            generation
        } else {
            generation + 1
        };
        match stored_value.get("status") {
            Some(status) => {
                if let Some(map) = value.as_object_mut() {
                    map.insert("status".to_string(), status.clone());
                }
            }
            None => {
                if let Some(map) = value.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        let version = inner.next_version;
        inner.next_version += 1;
        set_metadata_field(&mut value, "generation", Value::from(generation));
        set_metadata_field(&mut value, "resourceVersion", Value::from(version.to_string()));
        for field in ["uid", "deletionTimestamp"] {
            set_metadata_field(&mut value, field, metadata_field(&stored_value, field));
        }
        let updated: K = from_json(value)?;

        let purge = updated.meta().deletion_timestamp.is_some()
            && updated.finalizers().is_empty()
            && !inner.held.contains(&key);
        if purge {
            inner.objects.remove(&key);
        } else {
            inner.objects.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn replace_status(&self, obj: &K) -> StoreResult<K> {
        let mut inner = self.lock()?;
        let key = object_key(obj.meta().namespace.as_deref(), &obj.name_any());
        let Some(stored) = inner.objects.get(&key) else {
            return Err(StoreError::NotFound {
                kind: Self::kind(),
                key: display_key(&key),
            });
        };
        Self::check_version(stored, obj, &key)?;

        let mut value = to_json(stored)?;
        let status = to_json(obj)?.get("status").cloned().unwrap_or(Value::Null);
        if let Some(map) = value.as_object_mut() {
            map.insert("status".to_string(), status);
        }
        let version = inner.next_version;
        inner.next_version += 1;
        set_metadata_field(&mut value, "resourceVersion", Value::from(version.to_string()));
        let updated: K = from_json(value)?;
        inner.objects.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, namespace: Option<&str>, name: &str) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        let key = object_key(namespace, name);
        let Some(stored) = inner.objects.get(&key) else {
            return Ok(false);
        };
        if stored.finalizers().is_empty() && !inner.held.contains(&key) {
            inner.objects.remove(&key);
            return Ok(true);
        }
        if stored.meta().deletion_timestamp.is_some() {
            return Ok(true);
        }
        let mut value = to_json(stored)?;
        let version = inner.next_version;
        inner.next_version += 1;
        set_metadata_field(
            &mut value,
            "deletionTimestamp",
            Value::from(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()),
        );
        set_metadata_field(&mut value, "resourceVersion", Value::from(version.to_string()));
        let marked: K = from_json(value)?;
        inner.objects.insert(key, marked);
        Ok(true)
    }
}
