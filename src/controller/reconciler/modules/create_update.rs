//! Create or update the Module of every component that should have one.

use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::SyncOutcome;
use crate::constants::{LABEL_MODULE_OWNER, LABEL_STACK_NAME, LABEL_STACK_NAMESPACE};
use crate::controller::reconciler::overrides::{adopt_copies, render};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::status_updater::{ComponentUpdate, UpdateEvent};
use crate::crd::{ComponentState, ConditionType, Module, ModuleSpec, Stack, StackState};
use crate::observability::metrics;
use crate::registry::{Component, ComponentContext};
use crate::store::{create_or_update, OperationResult};

fn module_labels(stack: &Stack, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            LABEL_STACK_NAME.to_string(),
            stack.metadata.name.clone().unwrap_or_default(),
        ),
        (
            LABEL_STACK_NAMESPACE.to_string(),
            stack.metadata.namespace.clone().unwrap_or_default(),
        ),
        (LABEL_MODULE_OWNER.to_string(), component.to_string()),
    ])
}

/// A new Module waits until every enabled dependency reports ready
async fn dependencies_ready(
    ctx: &Reconciler,
    probe: ComponentContext<'_>,
    effective: &Stack,
    component: &dyn Component,
) -> Result<bool, ReconcilerError> {
    for name in component.dependencies() {
        let Some(dependency) = ctx.registry.get(name) else {
            continue;
        };
        if !dependency.is_enabled(effective) {
            continue;
        }
        if !dependency.is_ready(probe).await? {
            debug!(
                "Component {} waits for dependency {} to become ready",
                component.name(),
                name
            );
            return Ok(false);
        }
    }
    Ok(true)
}

/// Walk the registry in dependency order and upsert one Module per component.
///
/// Per-component failures are collected in the outcome; the walk continues.
pub async fn create_or_update_modules(
    ctx: &Reconciler,
    stack: &Stack,
    effective: &Stack,
) -> Result<SyncOutcome, ReconcilerError> {
    let upgrading = effective.is_upgrading();
    let probe = ComponentContext {
        stores: &ctx.stores,
        stack,
    };
    let mut outcome = SyncOutcome::default();
    let mut event = UpdateEvent::for_stack(stack);

    for component in ctx.registry.module_components() {
        let name = component.name();
        let namespace = component.namespace();
        let enabled = component.is_enabled(effective);

        let existing = match ctx.stores.modules.get(Some(namespace), name).await {
            Ok(existing) => existing,
            Err(e) => {
                outcome.errors.push(e.into());
                continue;
            }
        };

        if !enabled {
            // An existing Module is removed by the delete pass
            if existing.is_some() {
                continue;
            }
            match component.is_installed(probe).await {
                Ok(false) => continue,
                Ok(true) => info!(
                    "Component {} is disabled but installed; creating a Module to drive its removal",
                    name
                ),
                Err(e) => {
                    outcome.errors.push(e.into());
                    continue;
                }
            }
        }

        let Some(version) = ctx.catalog.module_version(name) else {
            warn!("No version for component {} in the bundled manifest", name);
            outcome
                .errors
                .push(ReconcilerError::MissingVersion(name.to_string()));
            continue;
        };

        if let Some(module) = &existing {
            if module.metadata.deletion_timestamp.is_some() {
                debug!("Module {}/{} is being deleted, waiting", namespace, name);
                outcome.pending += 1;
                continue;
            }
            if !upgrading && !component.monitor_overrides(effective) {
                debug!("Component {} does not monitor overrides, leaving its Module alone", name);
                continue;
            }
        } else if enabled {
            match dependencies_ready(ctx, probe, effective, component.as_ref()).await {
                Ok(true) => {}
                Ok(false) => {
                    outcome.pending += 1;
                    continue;
                }
                Err(e) => {
                    outcome.errors.push(e);
                    continue;
                }
            }
        }

        let rendered = match render(ctx, stack, effective, component.as_ref()).await {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!("Failed to render overrides of component {}: {}", name, e);
                outcome.errors.push(e);
                continue;
            }
        };

        let labels = module_labels(stack, name);
        let upserted = create_or_update(
            ctx.stores.modules.as_ref(),
            Some(namespace),
            name,
            || Module {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..ObjectMeta::default()
                },
                spec: ModuleSpec {
                    module_name: name.to_string(),
                    target_namespace: namespace.to_string(),
                    ..ModuleSpec::default()
                },
                status: None,
            },
            |module: &mut Module| {
                module
                    .metadata
                    .labels
                    .get_or_insert_with(BTreeMap::new)
                    .extend(labels.clone());
                module.spec.module_name = name.to_string();
                module.spec.target_namespace = namespace.to_string();
                module.spec.version.clone_from(&version);
                module.spec.values.clone_from(&rendered.values);
                module.spec.values_from.clone_from(&rendered.values_from);
            },
        )
        .await;
        let (module, result) = match upserted {
            Ok(upserted) => upserted,
            Err(e) => {
                warn!("Failed to write Module {}/{}: {}", namespace, name, e);
                outcome.errors.push(e.into());
                continue;
            }
        };

        if let Err(e) = adopt_copies(&ctx.stores, &module, &rendered.copies).await {
            outcome.errors.push(e.into());
        }

        match result {
            OperationResult::Created => {
                info!("📦 Created Module {}/{} at version {}", namespace, name, version);
                metrics::increment_module_operations("create");
            }
            OperationResult::Updated => {
                info!("🔄 Updated Module {}/{} (version {})", namespace, name, version);
                metrics::increment_module_operations("update");
            }
            OperationResult::Unchanged => {}
        }

        if result.changed() || rendered.changed {
            outcome.changed = true;
            let state = if upgrading {
                ComponentState::Upgrading
            } else if result == OperationResult::Created {
                ComponentState::Installing
            } else {
                ComponentState::Reconciling
            };
            event = event.with_component(name, ComponentUpdate::state(state));
        }
    }

    if outcome.changed && !upgrading {
        event = event
            .with_state(StackState::Reconciling)
            .with_condition(ConditionType::InstallStarted, "Install or update of components in progress");
    }
    ctx.updater.enqueue(event).await?;
    Ok(outcome)
}
