//! # Global Hooks
//!
//! Work that is not tied to a single component.
//!
//! Pre-work, in order: namespace bootstrap, stale Job cleanup,
//! prerequisite-secret checks, registration sync. Post-work runs the extension
//! hooks; after an upgrade it also restarts opted-in workloads and removes
//! upgrade leftovers. The first failure stops the cycle.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::types::{Reconciler, ReconcilerError};
use crate::constants::{
    ANNOTATION_RESTARTED_AT, LABEL_RESTART_ON_UPGRADE, LABEL_STACK_NAME, LABEL_STACK_NAMESPACE,
    LABEL_UPGRADE_LEFTOVER, REGISTRATION_SECRET_NAME,
};
use crate::crd::Stack;
use crate::store::retry::{RetryPolicy, WriteTarget};
use crate::store::{create_or_update, update_with_retry, OperationResult};

/// Name the local cluster registers under
const LOCAL_CLUSTER_NAME: &str = "local";

pub async fn run_pre_work(ctx: &Reconciler, stack: &Stack, effective: &Stack) -> Result<(), ReconcilerError> {
    bootstrap_namespaces(ctx, effective).await?;
    cleanup_finished_jobs(ctx, stack).await?;
    check_required_secrets(ctx, effective).await?;
    sync_registration(ctx, stack).await?;
    Ok(())
}

pub async fn run_pre_uninstall(ctx: &Reconciler, stack: &Stack) -> Result<(), ReconcilerError> {
    let namespace = stack.metadata.namespace.as_deref();
    if ctx
        .stores
        .secrets
        .delete(namespace, REGISTRATION_SECRET_NAME)
        .await?
    {
        info!("Removed registration secret of Stack {}", stack.key());
    }
    Ok(())
}

/// Run extension hooks; after an upgrade also restart opted-in workloads and
/// remove upgrade leftovers
pub async fn run_post_work(ctx: &Reconciler, effective: &Stack, upgrading: bool) -> Result<(), ReconcilerError> {
    for hook in &ctx.hooks {
        let outcome = if upgrading {
            hook.post_upgrade(&ctx.stores, effective).await
        } else {
            hook.post_install(&ctx.stores, effective).await
        };
        outcome.map_err(|message| ReconcilerError::Hook {
            hook: hook.name().to_string(),
            message,
        })?;
        debug!("Extension hook {} completed", hook.name());
    }
    if upgrading {
        let target = effective.spec_version().unwrap_or_default();
        restart_labelled_workloads(ctx, target).await?;
        cleanup_upgrade_leftovers(ctx).await?;
    }
    Ok(())
}

/// Create the namespace of every enabled component
async fn bootstrap_namespaces(ctx: &Reconciler, effective: &Stack) -> Result<(), ReconcilerError> {
    for component in ctx.registry.components() {
        if !component.is_operator_install_supported() || !component.is_enabled(effective) {
            continue;
        }
        let name = component.namespace();
        let (_, result) = create_or_update(
            ctx.stores.namespaces.as_ref(),
            None,
            name,
            || Namespace {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    ..ObjectMeta::default()
                },
                ..Namespace::default()
            },
            |_: &mut Namespace| {},
        )
        .await?;
        if result == OperationResult::Created {
            info!("Created namespace {}", name);
        }
    }
    Ok(())
}

fn job_finished(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| (c.type_ == "Complete" || c.type_ == "Failed") && c.status == "True")
        })
}

/// Delete finished Jobs spawned for this Stack
async fn cleanup_finished_jobs(ctx: &Reconciler, stack: &Stack) -> Result<(), ReconcilerError> {
    let selector = format!(
        "{}={},{}={}",
        LABEL_STACK_NAME,
        stack.metadata.name.as_deref().unwrap_or_default(),
        LABEL_STACK_NAMESPACE,
        stack.metadata.namespace.as_deref().unwrap_or_default()
    );
    for job in ctx.stores.jobs.list(None, Some(&selector)).await? {
        if !job_finished(&job) {
            continue;
        }
        let namespace = job.namespace();
        if ctx.stores.jobs.delete(namespace.as_deref(), &job.name_any()).await? {
            debug!("Deleted finished job {}", job.name_any());
        }
    }
    Ok(())
}

async fn check_required_secrets(ctx: &Reconciler, effective: &Stack) -> Result<(), ReconcilerError> {
    for component in ctx.registry.components() {
        if !component.is_enabled(effective) {
            continue;
        }
        let namespace = component.namespace();
        for secret in component.required_secrets() {
            if ctx.stores.secrets.get(Some(namespace), secret).await?.is_none() {
                return Err(ReconcilerError::Prerequisite {
                    component: component.name().to_string(),
                    namespace: namespace.to_string(),
                    secret: secret.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Keep the local cluster registration Secret in the Stack's namespace
async fn sync_registration(ctx: &Reconciler, stack: &Stack) -> Result<(), ReconcilerError> {
    let namespace = stack.metadata.namespace.clone().unwrap_or_default();
    let data = BTreeMap::from([
        (
            "cluster-name".to_string(),
            ByteString(LOCAL_CLUSTER_NAME.as_bytes().to_vec()),
        ),
        ("stack".to_string(), ByteString(stack.key().into_bytes())),
    ]);
    let (_, result) = create_or_update(
        ctx.stores.secrets.as_ref(),
        Some(&namespace),
        REGISTRATION_SECRET_NAME,
        || Secret {
            metadata: ObjectMeta {
                name: Some(REGISTRATION_SECRET_NAME.to_string()),
                namespace: Some(namespace.clone()),
                ..ObjectMeta::default()
            },
            ..Secret::default()
        },
        |secret: &mut Secret| {
            secret.data = Some(data.clone());
        },
    )
    .await?;
    if result.changed() {
        debug!("Registration secret of Stack {} synced", stack.key());
    }
    Ok(())
}

/// Stamp the target version on the pod template of every Deployment labelled
/// for restart. Re-running with the same version writes nothing.
async fn restart_labelled_workloads(ctx: &Reconciler, version: &str) -> Result<(), ReconcilerError> {
    let selector = format!("{LABEL_RESTART_ON_UPGRADE}=true");
    for deployment in ctx.stores.deployments.list(None, Some(&selector)).await? {
        let name = deployment.name_any();
        let namespace = deployment.namespace();
        let mut restarted = false;
        update_with_retry(
            ctx.stores.deployments.as_ref(),
            namespace.as_deref(),
            &name,
            WriteTarget::Object,
            RetryPolicy::default(),
            |d: &mut Deployment| {
                let Some(spec) = d.spec.as_mut() else {
                    return false;
                };
                let annotations = spec
                    .template
                    .metadata
                    .get_or_insert_with(ObjectMeta::default)
                    .annotations
                    .get_or_insert_with(BTreeMap::new);
                if annotations.get(ANNOTATION_RESTARTED_AT).map(String::as_str) == Some(version) {
                    return false;
                }
                annotations.insert(ANNOTATION_RESTARTED_AT.to_string(), version.to_string());
                restarted = true;
                true
            },
        )
        .await?;
        if restarted {
            info!(
                "♻️  Restart of deployment {}/{} requested for version {}",
                namespace.unwrap_or_default(),
                name,
                version
            );
        }
    }
    Ok(())
}

/// Delete Jobs and Secrets labelled as upgrade leftovers
async fn cleanup_upgrade_leftovers(ctx: &Reconciler) -> Result<(), ReconcilerError> {
    let selector = format!("{LABEL_UPGRADE_LEFTOVER}=true");
    for job in ctx.stores.jobs.list(None, Some(&selector)).await? {
        if ctx.stores.jobs.delete(job.namespace().as_deref(), &job.name_any()).await? {
            info!("Removed upgrade leftover job {}", job.name_any());
        }
    }
    for secret in ctx.stores.secrets.list(None, Some(&selector)).await? {
        if ctx
            .stores
            .secrets
            .delete(secret.namespace().as_deref(), &secret.name_any())
            .await?
        {
            info!("Removed upgrade leftover secret {}", secret.name_any());
        }
    }
    Ok(())
}
