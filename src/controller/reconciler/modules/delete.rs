//! Remove the Modules of disabled components, or of every component on uninstall.

use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::DeleteOutcome;
use crate::controller::reconciler::overrides::delete_copies;
use crate::controller::reconciler::types::Reconciler;
use crate::controller::status_updater::{ComponentUpdate, UpdateEvent};
use crate::crd::{ComponentState, Stack};
use crate::observability::metrics;

/// One deletion pass. A candidate counts as done once its Module is gone;
/// the pass is done when every candidate is.
pub async fn delete_modules(
    ctx: &Reconciler,
    stack: &Stack,
    effective: &Stack,
    full_uninstall: bool,
) -> DeleteOutcome {
    let mut outcome = DeleteOutcome::default();
    let mut event = UpdateEvent::for_stack(stack);

    for component in ctx.registry.module_components() {
        if !full_uninstall && component.is_enabled(effective) {
            continue;
        }
        outcome.candidates += 1;
        let name = component.name();
        let namespace = component.namespace();

        let module = match ctx.stores.modules.get(Some(namespace), name).await {
            Ok(module) => module,
            Err(e) => {
                outcome.errors.push(e.into());
                continue;
            }
        };

        let Some(module) = module else {
            match delete_copies(&ctx.stores, namespace, name).await {
                Ok(0) => {}
                Ok(n) => debug!("Removed {} leftover override copies of {}", n, name),
                Err(e) => {
                    outcome.errors.push(e.into());
                    continue;
                }
            }
            outcome.succeeded += 1;
            continue;
        };

        if let Err(e) = delete_copies(&ctx.stores, namespace, name).await {
            warn!("Failed to remove override copies of {}: {}", name, e);
            outcome.errors.push(e.into());
            continue;
        }
        if module.metadata.deletion_timestamp.is_some() {
            debug!("Module {}/{} is still being removed", namespace, module.name_any());
            continue;
        }
        match ctx.stores.modules.delete(Some(namespace), name).await {
            Ok(true) => {
                info!("🗑️  Deleting Module {}/{}", namespace, name);
                metrics::increment_module_operations("delete");
                event = event.with_component(name, ComponentUpdate::state(ComponentState::Uninstalling));
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Failed to delete Module {}/{}: {}", namespace, name, e);
                outcome.errors.push(e.into());
            }
        }
    }

    if let Err(e) = ctx.updater.enqueue(event).await {
        outcome.errors.push(e.into());
    }
    outcome
}
