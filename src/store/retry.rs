//! # Optimistic Concurrency Retry
//!
//! Fetch, merge, write, and go again on conflict. Status updates, Module
//! upserts, override copies and finalizer edits all go through
//! [`update_with_retry`]; [`create_or_update`] adds the create path on top.

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{ObjectStore, StoreError, StoreResult};
use crate::observability::metrics;

/// Which part of the object a write replaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTarget {
    Object,
    Status,
}

/// How long [`update_with_retry`] keeps going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between attempts
    pub delay: Duration,
    /// Conflicts tolerated before giving up; `None` retries conflicts forever
    pub max_conflicts: Option<u32>,
    /// Other store failures tolerated before giving up
    pub max_errors: u32,
}

impl RetryPolicy {
    /// Conflicts retried indefinitely, other failures up to `max_errors` times
    #[must_use]
    pub const fn until_written(delay: Duration, max_errors: u32) -> Self {
        Self {
            delay,
            max_conflicts: None,
            max_errors,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(100),
            max_conflicts: Some(5),
            max_errors: 0,
        }
    }
}

/// What [`create_or_update`] ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    Created,
    Updated,
    Unchanged,
}

impl OperationResult {
    #[must_use]
    pub fn changed(self) -> bool {
        self != OperationResult::Unchanged
    }
}

/// Re-fetch the object, let `merge` edit it, and write it back.
///
/// `merge` returns `false` when nothing needs writing; the current object is
/// then returned untouched. `Ok(None)` means the object does not exist
/// (or vanished mid-loop).
pub async fn update_with_retry<K, F>(
    store: &dyn ObjectStore<K>,
    namespace: Option<&str>,
    name: &str,
    target: WriteTarget,
    policy: RetryPolicy,
    mut merge: F,
) -> StoreResult<Option<K>>
where
    K: Clone + Send + Sync + 'static,
    F: FnMut(&mut K) -> bool + Send,
{
    let mut conflicts = 0u32;
    let mut errors = 0u32;
    loop {
        let current = match store.get(namespace, name).await {
            Ok(Some(current)) => current,
            Ok(None) => return Ok(None),
            Err(e) => {
                errors += 1;
                if errors > policy.max_errors {
                    return Err(e);
                }
                warn!("Fetch of {} failed (attempt {}): {}", name, errors, e);
                tokio::time::sleep(policy.delay).await;
                continue;
            }
        };

        let mut desired = current.clone();
        if !merge(&mut desired) {
            return Ok(Some(current));
        }

        let written = match target {
            WriteTarget::Object => store.replace(&desired).await,
            WriteTarget::Status => store.replace_status(&desired).await,
        };
        match written {
            Ok(obj) => return Ok(Some(obj)),
            Err(StoreError::NotFound { .. }) => return Ok(None),
            Err(e) if e.is_conflict() => {
                conflicts += 1;
                metrics::increment_store_conflicts();
                if policy.max_conflicts.is_some_and(|max| conflicts > max) {
                    return Err(e);
                }
                debug!("Conflict writing {} (attempt {}), retrying", name, conflicts);
            }
            Err(e) => {
                errors += 1;
                if errors > policy.max_errors {
                    return Err(e);
                }
                warn!("Write of {} failed (attempt {}): {}", name, errors, e);
            }
        }
        tokio::time::sleep(policy.delay).await;
    }
}

fn differs<K: Serialize>(before: &serde_json::Value, after: &K) -> bool {
    serde_json::to_value(after).map_or(true, |after| &after != before)
}

/// Create the object from `template` if it is missing, otherwise apply `mutate`
/// to the live copy and write it back.
///
/// Change detection compares the whole object (spec, metadata and status)
/// before and after `mutate`, so a mutation that reproduces what is already
/// stored does not write and reports [`OperationResult::Unchanged`].
pub async fn create_or_update<K, T, F>(
    store: &dyn ObjectStore<K>,
    namespace: Option<&str>,
    name: &str,
    template: T,
    mut mutate: F,
) -> StoreResult<(K, OperationResult)>
where
    K: Clone + Serialize + Send + Sync + 'static,
    T: Fn() -> K + Send,
    F: FnMut(&mut K) + Send,
{
    const ATTEMPTS: usize = 3;
    let mut last_err = None;
    for _ in 0..ATTEMPTS {
        if store.get(namespace, name).await?.is_none() {
            let mut obj = template();
            mutate(&mut obj);
            match store.create(&obj).await {
                Ok(created) => return Ok((created, OperationResult::Created)),
                Err(e @ StoreError::AlreadyExists { .. }) => {
                    last_err = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        let mut changed = false;
        let written = update_with_retry(
            store,
            namespace,
            name,
            WriteTarget::Object,
            RetryPolicy::default(),
            |obj: &mut K| {
                let before = serde_json::to_value(&*obj).unwrap_or(serde_json::Value::Null);
                mutate(obj);
                changed = differs(&before, obj);
                changed
            },
        )
        .await?;
        match written {
            Some(obj) if changed => return Ok((obj, OperationResult::Updated)),
            Some(obj) => return Ok((obj, OperationResult::Unchanged)),
            None => continue,
        }
    }
    Err(last_err.unwrap_or_else(|| StoreError::Conflict {
        kind: std::any::type_name::<K>().to_string(),
        key: name.to_string(),
    }))
}
