//! # Status Updater
//!
//! Every write to a Stack's status goes through one [`StatusUpdater`]. Producers
//! (reconcile steps, the availability observer) enqueue [`UpdateEvent`] deltas;
//! a single worker task applies them in order against a freshly fetched Stack.
//!
//! ## Contract
//!
//! - The queue is bounded. [`StatusUpdater::enqueue`] waits while it is full;
//!   events are never dropped for lack of space.
//! - Optimistic-concurrency conflicts are retried forever with a fixed delay.
//! - Other store failures are retried `status_max_api_retries` times, after
//!   which the event is dropped with an error log. The next reconcile
//!   recomputes the status.
//! - A write is skipped when applying the event leaves the status unchanged.
//! - [`StatusUpdater::flush`] returns once everything enqueued before it has
//!   been applied or dropped.
//! - The worker only runs between [`StatusUpdater::start`] and
//!   [`StatusUpdater::stop`]. Events enqueued before `start` wait in the queue.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::controller::reconciler::status::conditions::append_condition;
use crate::crd::{
    ComponentState, ComponentStatus, Condition, ConditionType, Stack, StackState, StackStatus,
};
use crate::observability::metrics;
use crate::store::retry::{RetryPolicy, WriteTarget};
use crate::store::{update_with_retry, ObjectStore};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpdaterError {
    #[error("status updater is not running")]
    NotRunning,
    #[error("status updater is already running")]
    AlreadyRunning,
    #[error("status updater has stopped")]
    Stopped,
}

/// Partial update of one component's record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentUpdate {
    pub state: Option<ComponentState>,
    pub available: Option<bool>,
    /// Merged with `max`, so it never moves backwards
    pub last_reconciled_generation: Option<i64>,
}

impl ComponentUpdate {
    #[must_use]
    pub fn state(state: ComponentState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn available(available: bool) -> Self {
        Self {
            available: Some(available),
            ..Self::default()
        }
    }

    fn apply(&self, record: &mut ComponentStatus) {
        if let Some(state) = self.state {
            record.state = state;
        }
        if let Some(available) = self.available {
            record.available = Some(available);
        }
        if let Some(generation) = self.last_reconciled_generation {
            record.last_reconciled_generation = record.last_reconciled_generation.max(generation);
        }
    }
}

/// A status delta for one Stack, applied exactly once by the worker
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEvent {
    pub namespace: String,
    pub name: String,
    pub state: Option<StackState>,
    pub condition: Option<(ConditionType, String)>,
    pub version: Option<String>,
    pub components: BTreeMap<String, ComponentUpdate>,
    /// Records inserted only when the component is not tracked yet
    pub seeds: BTreeMap<String, ComponentStatus>,
    /// Raise `lastReconciledGeneration` of every Ready component to this value
    pub force_ready_generation: Option<i64>,
}

impl UpdateEvent {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            state: None,
            condition: None,
            version: None,
            components: BTreeMap::new(),
            seeds: BTreeMap::new(),
            force_ready_generation: None,
        }
    }

    #[must_use]
    pub fn for_stack(stack: &Stack) -> Self {
        Self::new(
            stack.metadata.namespace.clone().unwrap_or_default(),
            stack.metadata.name.clone().unwrap_or_default(),
        )
    }

    #[must_use]
    pub fn with_state(mut self, state: StackState) -> Self {
        self.state = Some(state);
        self
    }

    #[must_use]
    pub fn with_condition(mut self, kind: ConditionType, message: impl Into<String>) -> Self {
        self.condition = Some((kind, message.into()));
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn with_component(mut self, name: impl Into<String>, update: ComponentUpdate) -> Self {
        self.components.insert(name.into(), update);
        self
    }

    #[must_use]
    pub fn with_seed(mut self, name: impl Into<String>, record: ComponentStatus) -> Self {
        self.seeds.insert(name.into(), record);
        self
    }

    #[must_use]
    pub fn with_ready_generation(mut self, generation: i64) -> Self {
        self.force_ready_generation = Some(generation);
        self
    }

    /// True when the event carries nothing to apply
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.is_none()
            && self.condition.is_none()
            && self.version.is_none()
            && self.components.is_empty()
            && self.seeds.is_empty()
            && self.force_ready_generation.is_none()
    }

    /// Merge this delta into `status`. Returns `true` when anything changed.
    pub fn apply_to(&self, status: &mut StackStatus) -> bool {
        let before = status.clone();

        for (name, seed) in &self.seeds {
            status
                .components
                .entry(name.clone())
                .or_insert_with(|| seed.clone());
        }
        for (name, update) in &self.components {
            update.apply(status.components.entry(name.clone()).or_default());
        }
        if let Some(state) = self.state {
            status.state = Some(state);
        }
        if let Some((kind, message)) = &self.condition {
            append_condition(status, Condition::new(*kind, message.clone()));
        }
        if let Some(version) = &self.version {
            status.version = Some(version.clone());
        }
        if let Some(generation) = self.force_ready_generation {
            for record in status.components.values_mut() {
                if record.state == ComponentState::Ready {
                    record.last_reconciled_generation =
                        record.last_reconciled_generation.max(generation);
                }
            }
        }

        *status != before
    }
}

/// Worker tuning
#[derive(Debug, Clone, Copy)]
pub struct UpdaterSettings {
    pub capacity: usize,
    pub conflict_delay: Duration,
    pub max_api_retries: u32,
}

impl UpdaterSettings {
    #[must_use]
    pub fn from_config(config: &crate::config::ControllerConfig) -> Self {
        Self {
            capacity: config.status_queue_capacity.max(1),
            conflict_delay: config.status_conflict_retry_duration(),
            max_api_retries: config.status_max_api_retries,
        }
    }
}

enum Command {
    Apply(Box<UpdateEvent>),
    Flush(oneshot::Sender<()>),
    Stop,
}

enum WorkerSlot {
    Idle(mpsc::Receiver<Command>),
    Running(JoinHandle<()>),
    Stopped,
}

/// Handle to the status queue; clones share the same queue and worker
#[derive(Clone)]
pub struct StatusUpdater {
    tx: mpsc::Sender<Command>,
    stacks: Arc<dyn ObjectStore<Stack>>,
    settings: UpdaterSettings,
    slot: Arc<Mutex<WorkerSlot>>,
}

impl std::fmt::Debug for StatusUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusUpdater")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl StatusUpdater {
    #[must_use]
    pub fn new(stacks: Arc<dyn ObjectStore<Stack>>, settings: UpdaterSettings) -> Self {
        let (tx, rx) = mpsc::channel(settings.capacity.max(1));
        Self {
            tx,
            stacks,
            settings,
            slot: Arc::new(Mutex::new(WorkerSlot::Idle(rx))),
        }
    }

    /// Spawn the worker task
    pub fn start(&self) -> Result<(), UpdaterError> {
        let mut slot = self.slot.lock().map_err(|_| UpdaterError::Stopped)?;
        let rx = match std::mem::replace(&mut *slot, WorkerSlot::Stopped) {
            WorkerSlot::Idle(rx) => rx,
            running @ WorkerSlot::Running(_) => {
                *slot = running;
                return Err(UpdaterError::AlreadyRunning);
            }
            WorkerSlot::Stopped => return Err(UpdaterError::Stopped),
        };
        let stacks = Arc::clone(&self.stacks);
        let settings = self.settings;
        *slot = WorkerSlot::Running(tokio::spawn(run_worker(stacks, rx, settings)));
        info!("Status updater started (queue capacity {})", settings.capacity);
        Ok(())
    }

    /// Apply everything already queued, then end the worker
    pub async fn stop(&self) -> Result<(), UpdaterError> {
        let handle = {
            let mut slot = self.slot.lock().map_err(|_| UpdaterError::Stopped)?;
            match std::mem::replace(&mut *slot, WorkerSlot::Stopped) {
                WorkerSlot::Running(handle) => handle,
                WorkerSlot::Idle(rx) => {
                    *slot = WorkerSlot::Idle(rx);
                    return Err(UpdaterError::NotRunning);
                }
                WorkerSlot::Stopped => return Err(UpdaterError::Stopped),
            }
        };
        self.tx
            .send(Command::Stop)
            .await
            .map_err(|_| UpdaterError::Stopped)?;
        if let Err(e) = handle.await {
            error!("Status updater worker ended abnormally: {}", e);
        }
        info!("Status updater stopped");
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| matches!(*slot, WorkerSlot::Running(_)))
            .unwrap_or(false)
    }

    /// Queue an event, waiting for space when the queue is full
    pub async fn enqueue(&self, event: UpdateEvent) -> Result<(), UpdaterError> {
        if event.is_empty() {
            return Ok(());
        }
        metrics::inc_status_queue_depth();
        if self.tx.send(Command::Apply(Box::new(event))).await.is_err() {
            metrics::dec_status_queue_depth();
            return Err(UpdaterError::Stopped);
        }
        Ok(())
    }

    /// Wait until every event enqueued before this call has been processed
    pub async fn flush(&self) -> Result<(), UpdaterError> {
        if !self.is_running() {
            return Err(UpdaterError::NotRunning);
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(done_tx))
            .await
            .map_err(|_| UpdaterError::Stopped)?;
        done_rx.await.map_err(|_| UpdaterError::Stopped)
    }
}

async fn run_worker(
    stacks: Arc<dyn ObjectStore<Stack>>,
    mut rx: mpsc::Receiver<Command>,
    settings: UpdaterSettings,
) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Apply(event) => {
                metrics::dec_status_queue_depth();
                apply_event(stacks.as_ref(), &event, settings).await;
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
            Command::Stop => break,
        }
    }
}

async fn apply_event(stacks: &dyn ObjectStore<Stack>, event: &UpdateEvent, settings: UpdaterSettings) {
    let mut wrote = false;
    let policy = RetryPolicy::until_written(settings.conflict_delay, settings.max_api_retries);
    let result = update_with_retry(
        stacks,
        Some(&event.namespace),
        &event.name,
        WriteTarget::Status,
        policy,
        |stack: &mut Stack| {
            let mut status = stack.status.clone().unwrap_or_default();
            wrote = event.apply_to(&mut status);
            if wrote {
                stack.status = Some(status);
            }
            wrote
        },
    )
    .await;

    match result {
        Ok(Some(_)) if wrote => {
            metrics::increment_status_writes();
            debug!("Applied status update to {}/{}", event.namespace, event.name);
        }
        Ok(Some(_)) => {}
        Ok(None) => {
            debug!(
                "Stack {}/{} no longer exists, dropping status update",
                event.namespace, event.name
            );
        }
        Err(e) => {
            error!(
                "❌ Dropping status update for {}/{} after repeated failures: {}",
                event.namespace, event.name, e
            );
            warn!("   The next reconcile will recompute the status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::StackSpec;
    use crate::store::MemoryStore;

    fn settings() -> UpdaterSettings {
        UpdaterSettings {
            capacity: 4,
            conflict_delay: Duration::from_millis(1),
            max_api_retries: 2,
        }
    }

    fn seeded_store() -> Arc<MemoryStore<Stack>> {
        let store = Arc::new(MemoryStore::<Stack>::new());
        let mut stack = Stack::new("platform", StackSpec::default());
        stack.metadata.namespace = Some("ns".into());
        store.upsert(stack).unwrap();
        store
    }

    #[test]
    fn test_component_generation_never_regresses() {
        let mut status = StackStatus::default();
        let raise = UpdateEvent::new("ns", "s").with_component(
            "alpha",
            ComponentUpdate {
                last_reconciled_generation: Some(4),
                ..ComponentUpdate::default()
            },
        );
        assert!(raise.apply_to(&mut status));

        let lower = UpdateEvent::new("ns", "s").with_component(
            "alpha",
            ComponentUpdate {
                last_reconciled_generation: Some(2),
                ..ComponentUpdate::default()
            },
        );
        assert!(!lower.apply_to(&mut status));
        assert_eq!(status.components["alpha"].last_reconciled_generation, 4);
    }

    #[test]
    fn test_seed_does_not_overwrite_tracked_component() {
        let mut status = StackStatus::default();
        UpdateEvent::new("ns", "s")
            .with_component("alpha", ComponentUpdate::state(ComponentState::Ready))
            .apply_to(&mut status);

        let seed = UpdateEvent::new("ns", "s")
            .with_seed("alpha", ComponentStatus::default())
            .with_seed("beta", ComponentStatus::default());
        assert!(seed.apply_to(&mut status));
        assert_eq!(status.components["alpha"].state, ComponentState::Ready);
        assert_eq!(status.components["beta"].state, ComponentState::Disabled);
    }

    #[test]
    fn test_force_ready_generation_only_touches_ready_components() {
        let mut status = StackStatus::default();
        UpdateEvent::new("ns", "s")
            .with_component("alpha", ComponentUpdate::state(ComponentState::Ready))
            .with_component("beta", ComponentUpdate::state(ComponentState::Installing))
            .with_ready_generation(3)
            .apply_to(&mut status);
        assert_eq!(status.components["alpha"].last_reconciled_generation, 3);
        assert_eq!(status.components["beta"].last_reconciled_generation, 0);
    }

    #[tokio::test]
    async fn test_events_are_applied_in_order_and_flush_waits() {
        let store = seeded_store();
        let updater = StatusUpdater::new(store.clone(), settings());
        updater.start().unwrap();

        updater
            .enqueue(
                UpdateEvent::new("ns", "platform")
                    .with_state(StackState::Reconciling)
                    .with_condition(ConditionType::InstallStarted, "Install started"),
            )
            .await
            .unwrap();
        updater
            .enqueue(
                UpdateEvent::new("ns", "platform")
                    .with_state(StackState::Ready)
                    .with_condition(ConditionType::InstallComplete, "Install complete"),
            )
            .await
            .unwrap();
        updater.flush().await.unwrap();

        let status = store.get_now(Some("ns"), "platform").unwrap().status.unwrap();
        assert_eq!(status.state, Some(StackState::Ready));
        assert_eq!(status.conditions.len(), 2);
        updater.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unchanged_status_is_not_written() {
        let store = seeded_store();
        let updater = StatusUpdater::new(store.clone(), settings());
        updater.start().unwrap();

        let event = UpdateEvent::new("ns", "platform").with_state(StackState::Ready);
        updater.enqueue(event.clone()).await.unwrap();
        updater.flush().await.unwrap();
        let first = store.get_now(Some("ns"), "platform").unwrap();

        updater.enqueue(event).await.unwrap();
        updater.flush().await.unwrap();
        let second = store.get_now(Some("ns"), "platform").unwrap();
        assert_eq!(
            first.metadata.resource_version,
            second.metadata.resource_version
        );
        updater.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let store = seeded_store();
        let updater = StatusUpdater::new(store, settings());
        assert_eq!(updater.flush().await, Err(UpdaterError::NotRunning));
        assert_eq!(updater.stop().await, Err(UpdaterError::NotRunning));

        updater.start().unwrap();
        assert_eq!(updater.start(), Err(UpdaterError::AlreadyRunning));
        updater.stop().await.unwrap();

        assert_eq!(updater.start(), Err(UpdaterError::Stopped));
        assert_eq!(
            updater
                .enqueue(UpdateEvent::new("ns", "platform").with_state(StackState::Ready))
                .await,
            Err(UpdaterError::Stopped)
        );
    }

    #[tokio::test]
    async fn test_events_for_missing_stack_are_dropped() {
        let store = Arc::new(MemoryStore::<Stack>::new());
        let updater = StatusUpdater::new(store.clone(), settings());
        updater.start().unwrap();
        updater
            .enqueue(UpdateEvent::new("ns", "gone").with_state(StackState::Ready))
            .await
            .unwrap();
        updater.flush().await.unwrap();
        assert!(store.all().is_empty());
        updater.stop().await.unwrap();
    }
}
