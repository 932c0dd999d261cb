//! # Resource Bookkeeping
//!
//! First step of every reconcile: make sure the finalizer is attached and that
//! every operator-installed component has a status record.

use tracing::{debug, info};

use super::types::{Reconciler, ReconcilerError};
use crate::constants::FINALIZER;
use crate::controller::status_updater::UpdateEvent;
use crate::crd::{ComponentState, ComponentStatus, Stack};
use crate::registry::ComponentContext;
use crate::store::retry::{RetryPolicy, WriteTarget};
use crate::store::update_with_retry;

/// Attach the finalizer token if it is missing. Returns the live Stack.
pub async fn ensure_finalizer(ctx: &Reconciler, stack: &Stack) -> Result<Stack, ReconcilerError> {
    if stack.has_finalizer(FINALIZER) {
        return Ok(stack.clone());
    }
    let name = stack.metadata.name.clone().unwrap_or_default();
    let updated = update_with_retry(
        ctx.stores.stacks.as_ref(),
        stack.metadata.namespace.as_deref(),
        &name,
        WriteTarget::Object,
        RetryPolicy::default(),
        |live: &mut Stack| {
            if live.has_finalizer(FINALIZER) {
                return false;
            }
            live.metadata
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(FINALIZER.to_string());
            true
        },
    )
    .await?;
    match updated {
        Some(live) => {
            info!("Added finalizer to Stack {}", stack.key());
            Ok(live)
        }
        None => Err(ReconcilerError::Store(crate::store::StoreError::NotFound {
            kind: "Stack".to_string(),
            key: stack.key(),
        })),
    }
}

/// Seed a record for every operator-installed component not tracked yet.
///
/// The installed probe decides the seed: a component found installed starts
/// as Ready, anything else as Disabled.
pub async fn seed_component_statuses(ctx: &Reconciler, stack: &Stack) -> Result<(), ReconcilerError> {
    let tracked = stack.status.as_ref().map(|s| &s.components);
    let probe_ctx = ComponentContext {
        stores: &ctx.stores,
        stack,
    };

    let mut event = UpdateEvent::for_stack(stack);
    for component in ctx.registry.components() {
        if !component.is_operator_install_supported() {
            continue;
        }
        if tracked.is_some_and(|t| t.contains_key(component.name())) {
            continue;
        }
        let state = if component.is_installed(probe_ctx).await? {
            ComponentState::Ready
        } else {
            ComponentState::Disabled
        };
        debug!("Seeding status of component {} as {}", component.name(), state);
        event = event.with_seed(
            component.name(),
            ComponentStatus {
                state,
                ..ComponentStatus::default()
            },
        );
    }
    ctx.updater.enqueue(event).await?;
    Ok(())
}
