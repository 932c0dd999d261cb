//! # Reconcile
//!
//! One pass over a Stack. Safe to call any number of times; each call either
//! finishes (`Done`) or asks to be called again.
//!
//! ## Flow
//!
//! 1. Deletion → uninstall workflow
//! 2. Finalizer and component status seeding
//! 3. Upgrade gate
//! 4. Effective state, upgrade start
//! 5. Pre-work hooks
//! 6. Module create/update, Module delete
//! 7. Component states, convergence
//! 8. Post-work hooks
//! 9. Completion

use serde_json::Value;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::hooks::{run_post_work, run_pre_work};
use super::init::{ensure_finalizer, seed_component_statuses};
use super::modules::{create_or_update_modules, delete_modules};
use super::status::{check_convergence, refresh_component_states, surface_failures};
use super::types::{ReconcileResult, Reconciler, ReconcilerError};
use super::uninstall::run_uninstall;
use super::upgrade::{self, GateDecision};
use crate::controller::status_updater::UpdateEvent;
use crate::crd::{ComponentState, ConditionType, Stack, StackState};
use crate::observability::metrics;

/// Entry point for untyped input; a payload that is not a Stack is logged and dropped
pub async fn reconcile_raw(raw: Value, ctx: &Reconciler) -> ReconcileResult {
    match serde_json::from_value::<Stack>(raw) {
        Ok(stack) => reconcile(&stack, ctx).await,
        Err(e) => {
            let e = ReconcilerError::Decode(e.to_string());
            error!("❌ {}", e);
            ReconcileResult::Done
        }
    }
}

pub async fn reconcile(stack: &Stack, ctx: &Reconciler) -> ReconcileResult {
    let span = info_span!(
        "reconcile",
        stack.name = stack.metadata.name.as_deref().unwrap_or("unknown"),
        stack.namespace = stack.metadata.namespace.as_deref().unwrap_or("default"),
        stack.generation = stack.generation()
    );
    async move {
        let start = Instant::now();
        metrics::increment_reconciliations();

        let result = match run(stack, ctx).await {
            Ok(result) => result,
            Err(e) => ctx.requeue_with(e),
        };

        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
        match &result {
            ReconcileResult::Done => debug!("Reconcile of {} done", stack.key()),
            ReconcileResult::Requeue(delay) => {
                metrics::increment_requeues_total(result.as_str());
                debug!("Reconcile of {} pending, requeue in {:?}", stack.key(), delay);
            }
            // Counted by the runtime error policy
            ReconcileResult::RequeueWithError(delay, e) => {
                warn!("Reconcile of {} failed, retrying in {:?}: {}", stack.key(), delay, e);
            }
        }
        result
    }
    .instrument(span)
    .await
}

async fn run(stack: &Stack, ctx: &Reconciler) -> Result<ReconcileResult, ReconcilerError> {
    if stack.is_being_deleted() {
        return run_uninstall(ctx, stack).await;
    }

    let stack = ensure_finalizer(ctx, stack).await?;
    seed_component_statuses(ctx, &stack).await?;

    if stack.status.as_ref().and_then(|s| s.state) == Some(StackState::Failed) {
        debug!("Stack {} is Failed, nothing to do until it is deleted", stack.key());
        return Ok(ReconcileResult::Done);
    }

    if let GateDecision::Paused { current, available } = upgrade::check_gate(&ctx.bom_version, &stack)? {
        upgrade::pause(ctx, &stack, &current, &available).await?;
        return Ok(ctx.short_requeue());
    }

    let effective = ctx.resolver.resolve(&stack)?;
    let upgrading = effective.is_upgrading();
    if upgrading && !upgrade::begin(ctx, &stack).await? {
        return Ok(ReconcileResult::Done);
    }

    run_pre_work(ctx, &stack, &effective).await?;

    let created = create_or_update_modules(ctx, &stack, &effective).await?;
    let deleted = delete_modules(ctx, &stack, &effective, false).await;
    let deleted_done = deleted.is_done();
    let mut errors: Vec<_> = created.errors.into_iter().chain(deleted.errors).collect();
    if !errors.is_empty() {
        let rejections: Vec<_> = errors
            .iter()
            .filter_map(|e| e.rejected_component().map(|name| (name.to_string(), e.to_string())))
            .collect();
        surface_failures(ctx, &stack, &effective, &rejections).await?;
        let first = errors.remove(0);
        for e in errors {
            warn!("Component work for {} failed: {}", stack.key(), e);
        }
        return Ok(ctx.requeue_with(first));
    }
    if created.pending > 0 || !deleted_done {
        debug!(
            "Components of {} pending ({} waiting, {}/{} removed)",
            stack.key(),
            created.pending,
            deleted.succeeded,
            deleted.candidates
        );
        return Ok(ctx.short_requeue());
    }

    refresh_component_states(ctx, &stack, &effective).await?;

    let convergence = check_convergence(ctx, &effective).await?;
    surface_failures(ctx, &stack, &effective, &convergence.failures).await?;
    if !convergence.is_converged() {
        debug!("Waiting for Modules to converge: {}", convergence.waiting.join(", "));
        return Ok(ctx.short_requeue());
    }

    run_post_work(ctx, &effective, upgrading).await?;

    complete(ctx, &stack, upgrading).await
}

/// Whether the status already records this exact completion
fn already_complete(stack: &Stack, version: &str, complete: ConditionType) -> bool {
    let Some(status) = stack.status.as_ref() else {
        return false;
    };
    status.state == Some(StackState::Ready)
        && status.version.as_deref() == Some(version)
        && status.latest_of(complete.class()).map(|c| c.r#type) == Some(complete)
        && status
            .components
            .values()
            .filter(|c| c.state == ComponentState::Ready)
            .all(|c| c.last_reconciled_generation >= stack.generation())
}

/// Record completion and confirm it landed. A completion the status queue
/// had to drop is retried instead of reported as done.
async fn complete(ctx: &Reconciler, stack: &Stack, upgrading: bool) -> Result<ReconcileResult, ReconcilerError> {
    let version = stack
        .spec_version()
        .map_or_else(|| ctx.bom_version.clone(), str::to_string);
    let condition = if upgrading {
        ConditionType::UpgradeComplete
    } else {
        ConditionType::InstallComplete
    };
    if already_complete(stack, &version, condition) {
        return Ok(ReconcileResult::Done);
    }

    let message = if upgrading {
        format!("Upgrade to version {version} complete")
    } else {
        format!("Stack version {version} installed")
    };
    ctx.updater
        .enqueue(
            UpdateEvent::for_stack(stack)
                .with_state(StackState::Ready)
                .with_condition(condition, message)
                .with_version(version.clone())
                .with_ready_generation(stack.generation()),
        )
        .await?;
    ctx.updater.flush().await?;

    let recorded = ctx
        .stores
        .stacks
        .get(stack.metadata.namespace.as_deref(), stack.metadata.name.as_deref().unwrap_or_default())
        .await?;
    if !recorded.is_some_and(|s| already_complete(&s, &version, condition)) {
        warn!("Completion of Stack {} was not recorded, retrying", stack.key());
        return Ok(ctx.short_requeue());
    }
    info!("✅ Stack {} is ready at version {}", stack.key(), version);
    Ok(ReconcileResult::Done)
}
