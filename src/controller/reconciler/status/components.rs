//! Per-component state derived from each component's Module.

use super::super::types::{Reconciler, ReconcilerError};
use crate::controller::status_updater::{ComponentUpdate, UpdateEvent};
use crate::crd::{ComponentState, Module, Stack};
use crate::registry::ComponentContext;

/// State a Module-driven component is in, judged from its Module
#[must_use]
pub fn module_component_state(enabled: bool, upgrading: bool, module: Option<&Module>) -> ComponentState {
    let Some(module) = module else {
        return if enabled {
            ComponentState::Installing
        } else {
            ComponentState::Disabled
        };
    };
    if !enabled || module.metadata.deletion_timestamp.is_some() {
        return ComponentState::Uninstalling;
    }
    if module.is_converged() {
        return ComponentState::Ready;
    }
    if module.is_failed() {
        return ComponentState::Failed;
    }
    if upgrading {
        return ComponentState::Upgrading;
    }
    let applied_before = module
        .status
        .as_ref()
        .is_some_and(|s| s.last_successful_version.is_some());
    if applied_before {
        ComponentState::Reconciling
    } else {
        ComponentState::Installing
    }
}

/// Refresh the state of every tracked component
pub async fn refresh_component_states(
    ctx: &Reconciler,
    stack: &Stack,
    effective: &Stack,
) -> Result<(), ReconcilerError> {
    let upgrading = effective.is_upgrading();
    let probe = ComponentContext {
        stores: &ctx.stores,
        stack,
    };
    let mut event = UpdateEvent::for_stack(stack);

    for component in ctx.registry.components() {
        if !component.is_operator_install_supported() {
            continue;
        }
        let enabled = component.is_enabled(effective);
        let state = if component.should_use_module() {
            let module = ctx
                .stores
                .modules
                .get(Some(component.namespace()), component.name())
                .await?;
            module_component_state(enabled, upgrading, module.as_ref())
        } else if !enabled {
            ComponentState::Disabled
        } else if component.is_ready(probe).await? {
            ComponentState::Ready
        } else {
            ComponentState::Installing
        };
        event = event.with_component(component.name(), ComponentUpdate::state(state));
    }

    ctx.updater.enqueue(event).await?;
    Ok(())
}
