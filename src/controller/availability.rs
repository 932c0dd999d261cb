//! # Availability Observer
//!
//! Periodically reports whether each component's Module is ready, as the
//! `available` flag of the component record. Runs beside the reconciler and
//! writes through the same status updater.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::controller::status_updater::{ComponentUpdate, UpdateEvent};

/// One observation pass over every Stack. Returns the number of events queued.
pub async fn observe_once(ctx: &Reconciler) -> Result<usize, ReconcilerError> {
    let mut queued = 0;
    for stack in ctx.stores.stacks.list(None, None).await? {
        if stack.is_being_deleted() {
            continue;
        }
        let Some(status) = stack.status.as_ref() else {
            continue;
        };
        let mut event = UpdateEvent::for_stack(&stack);
        for component in ctx.registry.module_components() {
            let Some(record) = status.components.get(component.name()) else {
                continue;
            };
            let available = ctx
                .stores
                .modules
                .get(Some(component.namespace()), component.name())
                .await?
                .is_some_and(|m| m.is_ready());
            if record.available != Some(available) {
                event = event.with_component(component.name(), ComponentUpdate::available(available));
            }
        }
        if !event.is_empty() {
            ctx.updater.enqueue(event).await?;
            queued += 1;
        }
    }
    Ok(queued)
}

/// Run [`observe_once`] every `interval` until the task is aborted
pub fn spawn_availability_observer(ctx: Arc<Reconciler>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match observe_once(&ctx).await {
                Ok(0) => {}
                Ok(n) => debug!("Availability changed on {} stack(s)", n),
                Err(e) => warn!("Availability check failed: {}", e),
            }
        }
    })
}
