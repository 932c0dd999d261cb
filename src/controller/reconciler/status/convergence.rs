//! Whether every Module-driven component has settled on the effective state.

use tracing::warn;

use super::super::types::{Reconciler, ReconcilerError};
use crate::controller::status_updater::UpdateEvent;
use crate::crd::{ConditionType, Stack};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Convergence {
    /// Components not converged yet
    pub waiting: Vec<String>,
    /// `(component, message)` for Modules whose backend reported failure
    pub failures: Vec<(String, String)>,
}

impl Convergence {
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.waiting.is_empty() && self.failures.is_empty()
    }
}

/// A disabled component converges once its Module is gone; an enabled one
/// once its Module is ready for its current generation and version
pub async fn check_convergence(ctx: &Reconciler, effective: &Stack) -> Result<Convergence, ReconcilerError> {
    let mut result = Convergence::default();
    for component in ctx.registry.module_components() {
        let name = component.name();
        let module = ctx
            .stores
            .modules
            .get(Some(component.namespace()), name)
            .await?;
        match module {
            None if !component.is_enabled(effective) => {}
            Some(module) if component.is_enabled(effective) => {
                if module.is_converged() {
                    continue;
                }
                match module.failure_message() {
                    Some(message) => result.failures.push((name.to_string(), message)),
                    None if module.is_failed() => result
                        .failures
                        .push((name.to_string(), "module reported failure".to_string())),
                    None => result.waiting.push(name.to_string()),
                }
            }
            _ => result.waiting.push(name.to_string()),
        }
    }
    Ok(result)
}

/// Record failed Modules as `InstallFailed`, or `UpgradeFailed` naming the target version
pub async fn surface_failures(
    ctx: &Reconciler,
    stack: &Stack,
    effective: &Stack,
    failures: &[(String, String)],
) -> Result<(), ReconcilerError> {
    if failures.is_empty() {
        return Ok(());
    }
    let detail = failures
        .iter()
        .map(|(name, message)| format!("{name}: {message}"))
        .collect::<Vec<_>>()
        .join("; ");
    let event = if effective.is_upgrading() {
        let target = effective.spec_version().unwrap_or_default();
        warn!("❌ Upgrade of Stack {} to {} failed: {}", stack.key(), target, detail);
        UpdateEvent::for_stack(stack).with_condition(
            ConditionType::UpgradeFailed,
            format!("Upgrade to version {target} failed: {detail}"),
        )
    } else {
        warn!("❌ Install of Stack {} failed: {}", stack.key(), detail);
        UpdateEvent::for_stack(stack)
            .with_condition(ConditionType::InstallFailed, format!("Install failed: {detail}"))
    };
    ctx.updater.enqueue(event).await?;
    Ok(())
}
