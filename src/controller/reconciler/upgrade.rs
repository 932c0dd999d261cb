//! # Upgrade Gate
//!
//! Upgrades only happen when the user asks for them by bumping `spec.version`.
//! A newer bundled manifest on its own pauses all component work.

use tracing::{info, warn};

use super::status::conditions::upgrade_failures;
use super::types::{Reconciler, ReconcilerError};
use crate::bom::parse_version;
use crate::constants::MAX_UPGRADE_FAILURES;
use crate::controller::status_updater::UpdateEvent;
use crate::crd::{ConditionType, Stack, StackState};

/// Result of checking the bundled version against the Stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    /// The manifest is newer than the version the Stack asks for or runs
    Paused { current: String, available: String },
}

/// Compare the manifest version with `spec.version`, or with
/// `status.version` when no target is set. A fresh Stack with neither
/// installs the bundled version and is never paused.
pub fn check_gate(bom_version: &str, stack: &Stack) -> Result<GateDecision, ReconcilerError> {
    let Some(current) = stack.spec_version().or(stack.status_version()) else {
        return Ok(GateDecision::Proceed);
    };
    let bundled = parse_version(bom_version)?;
    if parse_version(current)? < bundled {
        return Ok(GateDecision::Paused {
            current: current.to_string(),
            available: bom_version.to_string(),
        });
    }
    Ok(GateDecision::Proceed)
}

/// Surface `UpgradePaused` once per cycle
pub async fn pause(ctx: &Reconciler, stack: &Stack, current: &str, available: &str) -> Result<(), ReconcilerError> {
    info!(
        "⏸️  Stack {} runs {} but {} is available; set spec.version to upgrade",
        stack.key(),
        current,
        available
    );
    let event = UpdateEvent::for_stack(stack).with_condition(
        ConditionType::UpgradePaused,
        format!("Upgrade from {current} to {available} is available; set spec.version to {available} to upgrade"),
    );
    ctx.updater.enqueue(event).await?;
    Ok(())
}

/// Open an upgrade cycle. Returns `false` when the Stack has exhausted its
/// upgrade attempts and was marked Failed instead.
pub async fn begin(ctx: &Reconciler, stack: &Stack) -> Result<bool, ReconcilerError> {
    let target = stack.spec_version().unwrap_or_default();
    let failures = stack.status.as_ref().map_or(0, upgrade_failures);
    if failures >= MAX_UPGRADE_FAILURES {
        warn!(
            "❌ Upgrade of Stack {} to {} failed {} times, giving up",
            stack.key(),
            target,
            failures
        );
        ctx.updater
            .enqueue(UpdateEvent::for_stack(stack).with_state(StackState::Failed))
            .await?;
        return Ok(false);
    }

    let event = UpdateEvent::for_stack(stack)
        .with_state(StackState::Upgrading)
        .with_condition(
            ConditionType::UpgradeStarted,
            format!("Upgrade to version {target} in progress"),
        );
    ctx.updater.enqueue(event).await?;
    Ok(true)
}
