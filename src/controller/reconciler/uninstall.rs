//! # Uninstall
//!
//! Runs while a Stack carrying the finalizer is being deleted. Every step is
//! safe to repeat; the workflow requeues until Modules and managed namespaces
//! are gone, then releases the finalizer.

use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use super::hooks::run_pre_uninstall;
use super::modules::delete_modules;
use super::types::{ReconcileResult, Reconciler, ReconcilerError};
use crate::constants::{FINALIZER, ROOT_CA_CONFIGMAP_NAME};
use crate::controller::status_updater::UpdateEvent;
use crate::crd::{ConditionType, Stack, StackState};
use crate::store::retry::{RetryPolicy, WriteTarget};
use crate::store::update_with_retry;

pub async fn run_uninstall(ctx: &Reconciler, stack: &Stack) -> Result<ReconcileResult, ReconcilerError> {
    if !stack.has_finalizer(FINALIZER) {
        return Ok(ReconcileResult::Done);
    }
    info!("🧹 Uninstalling Stack {}", stack.key());

    ctx.updater
        .enqueue(
            UpdateEvent::for_stack(stack)
                .with_state(StackState::Uninstalling)
                .with_condition(ConditionType::UninstallStarted, "Uninstall in progress"),
        )
        .await?;

    let effective = ctx.resolver.resolve(stack)?;
    run_pre_uninstall(ctx, stack).await?;

    let outcome = delete_modules(ctx, stack, &effective, true).await;
    for e in &outcome.errors {
        warn!("Module removal for Stack {} failed: {}", stack.key(), e);
    }
    if !outcome.is_done() {
        debug!(
            "Waiting for Modules of Stack {} ({}/{} removed)",
            stack.key(),
            outcome.succeeded,
            outcome.candidates
        );
        return Ok(ctx.short_requeue());
    }

    delete_root_ca_bundles(ctx).await?;
    delete_legacy_rbac(ctx).await?;
    if !delete_managed_namespaces(ctx, stack).await? {
        return Ok(ctx.short_requeue());
    }

    ctx.updater
        .enqueue(
            UpdateEvent::for_stack(stack)
                .with_condition(ConditionType::UninstallComplete, "Uninstall complete"),
        )
        .await?;
    ctx.updater.flush().await?;

    remove_finalizer(ctx, stack).await?;
    info!("✅ Uninstall of Stack {} complete", stack.key());
    Ok(ReconcileResult::Done)
}

async fn delete_root_ca_bundles(ctx: &Reconciler) -> Result<(), ReconcilerError> {
    for cm in ctx.stores.config_maps.list(None, None).await? {
        if cm.name_any() != ROOT_CA_CONFIGMAP_NAME {
            continue;
        }
        let namespace = cm.namespace();
        if ctx
            .stores
            .config_maps
            .delete(namespace.as_deref(), ROOT_CA_CONFIGMAP_NAME)
            .await?
        {
            debug!(
                "Deleted {} in namespace {}",
                ROOT_CA_CONFIGMAP_NAME,
                namespace.unwrap_or_default()
            );
        }
    }
    Ok(())
}

async fn delete_legacy_rbac(ctx: &Reconciler) -> Result<(), ReconcilerError> {
    for name in &ctx.config.legacy_cluster_roles {
        if ctx.stores.cluster_role_bindings.delete(None, name).await? {
            debug!("Deleted legacy ClusterRoleBinding {}", name);
        }
        if ctx.stores.cluster_roles.delete(None, name).await? {
            debug!("Deleted legacy ClusterRole {}", name);
        }
    }
    Ok(())
}

/// Component namespaces plus the configured shared ones, never the Stack's
/// own namespace or the operator's
#[must_use]
pub fn managed_namespaces(ctx: &Reconciler, stack: &Stack) -> BTreeSet<String> {
    let own = stack.metadata.namespace.as_deref().unwrap_or_default();
    ctx.registry
        .components()
        .filter(|c| c.is_operator_install_supported())
        .map(|c| c.namespace().to_string())
        .chain(ctx.config.shared_namespaces.iter().cloned())
        .filter(|ns| ns != own && *ns != ctx.config.operator_namespace)
        .collect()
}

/// Strip finalizers from and delete every managed namespace.
/// Returns `true` once none of them exists any more.
async fn delete_managed_namespaces(ctx: &Reconciler, stack: &Stack) -> Result<bool, ReconcilerError> {
    let namespaces = managed_namespaces(ctx, stack);
    for name in &namespaces {
        update_with_retry(
            ctx.stores.namespaces.as_ref(),
            None,
            name,
            WriteTarget::Object,
            RetryPolicy::default(),
            |ns: &mut Namespace| {
                let mut changed = false;
                if ns.metadata.finalizers.as_ref().is_some_and(|f| !f.is_empty()) {
                    ns.metadata.finalizers = None;
                    changed = true;
                }
                if let Some(spec) = ns.spec.as_mut() {
                    if spec.finalizers.as_ref().is_some_and(|f| !f.is_empty()) {
                        spec.finalizers = None;
                        changed = true;
                    }
                }
                changed
            },
        )
        .await?;
        if ctx.stores.namespaces.delete(None, name).await? {
            debug!("Deleting namespace {}", name);
        }
    }

    let mut remaining = Vec::new();
    for name in &namespaces {
        if ctx.stores.namespaces.get(None, name).await?.is_some() {
            remaining.push(name.as_str());
        }
    }
    if remaining.is_empty() {
        return Ok(true);
    }
    debug!("Waiting for namespaces to terminate: {}", remaining.join(", "));
    Ok(false)
}

async fn remove_finalizer(ctx: &Reconciler, stack: &Stack) -> Result<(), ReconcilerError> {
    let name = stack.metadata.name.clone().unwrap_or_default();
    update_with_retry(
        ctx.stores.stacks.as_ref(),
        stack.metadata.namespace.as_deref(),
        &name,
        WriteTarget::Object,
        RetryPolicy::default(),
        |live: &mut Stack| {
            let Some(finalizers) = live.metadata.finalizers.as_mut() else {
                return false;
            };
            let before = finalizers.len();
            finalizers.retain(|f| f != FINALIZER);
            finalizers.len() != before
        },
    )
    .await?;
    Ok(())
}
