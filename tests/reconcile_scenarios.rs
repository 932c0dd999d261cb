//! # Reconcile Scenarios
//!
//! End-to-end reconcile runs against in-memory stores:
//! install, disable, uninstall, concurrent status writers, and status
//! writes that conflict or fail.

mod common;

use common::*;
use k8s_openapi::api::core::v1::{ConfigMap, NamespaceSpec};
use k8s_openapi::api::rbac::v1::ClusterRole;
use kube::api::ObjectMeta;
use stack_operator::config::ControllerConfig;
use stack_operator::constants::{
    FINALIZER, LABEL_MODULE_OWNER, REGISTRATION_SECRET_NAME, ROOT_CA_CONFIGMAP_NAME,
};
use stack_operator::controller::availability::observe_once;
use stack_operator::controller::reconciler::ReconcileResult;
use stack_operator::controller::status_updater::{ComponentUpdate, UpdateEvent};
use stack_operator::crd::{
    ComponentSpec, ComponentState, ConditionType, KeyRef, OperationClass, Overrides, StackState,
};
use stack_operator::store::ObjectStore;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_install_single_component() {
    let h = Harness::new(REGISTRY, BOM_1_0);
    h.create_stack(only(&["alpha"]));

    let first = h.reconcile().await;
    assert!(matches!(first, ReconcileResult::Requeue(_)));
    let alpha = h.module("alpha").expect("alpha module created");
    assert_eq!(alpha.spec.version, "1.0");
    assert_eq!(alpha.spec.target_namespace, "alpha-system");
    assert!(h.module("beta").is_none());
    assert!(h.stack().has_finalizer(FINALIZER));

    let status = h.status();
    assert_eq!(status.state, Some(StackState::Reconciling));
    assert_eq!(status.components["alpha"].state, ComponentState::Installing);
    assert_eq!(status.components["beta"].state, ComponentState::Disabled);

    h.run_backend().await;
    assert!(h.reconcile().await.is_done());

    let status = h.status();
    assert_eq!(status.state, Some(StackState::Ready));
    assert_eq!(status.version.as_deref(), Some("1.0"));
    assert_eq!(status.components["alpha"].state, ComponentState::Ready);
    assert_eq!(status.components["alpha"].last_reconciled_generation, 1);
    assert_eq!(
        status.latest_of(OperationClass::Install).map(|c| c.r#type),
        Some(ConditionType::InstallComplete)
    );
    assert_eq!(status.count_of(ConditionType::InstallStarted), 1);
}

#[tokio::test]
async fn test_converged_stack_reconciles_without_writes() {
    let h = Harness::new(REGISTRY, BOM_1_0);
    h.create_stack(only(&["alpha"]));
    assert!(h.converge().await.is_done());

    let before = h.versions();
    let conditions = h.status().conditions.len();

    assert!(h.reconcile().await.is_done());
    assert!(h.reconcile().await.is_done());

    assert_eq!(h.versions(), before);
    assert_eq!(h.status().conditions.len(), conditions);
}

#[tokio::test]
async fn test_dependent_waits_for_dependency() {
    let h = Harness::new(REGISTRY, BOM_1_0);
    h.create_stack(only(&["alpha", "beta"]));

    assert!(matches!(h.reconcile().await, ReconcileResult::Requeue(_)));
    assert!(h.module("alpha").is_some());
    assert!(h.module("beta").is_none());

    h.run_backend().await;
    assert!(matches!(h.reconcile().await, ReconcileResult::Requeue(_)));
    assert!(h.module("beta").is_some());

    h.run_backend().await;
    assert!(h.reconcile().await.is_done());
    assert_eq!(h.status().components["beta"].state, ComponentState::Ready);
}

#[tokio::test]
async fn test_disabling_component_removes_copies_then_module() {
    let h = Harness::new(REGISTRY, BOM_1_0);
    h.memory
        .secrets
        .upsert(secret(STACK_NAMESPACE, "beta-values", &[("values.yaml", "replicas: 2")]))
        .unwrap();
    let mut spec = only(&["alpha", "beta"]);
    spec.components.insert(
        "beta".into(),
        ComponentSpec {
            enabled: Some(true),
            config: Some(serde_json::json!({"replicas": 1})),
            overrides: vec![Overrides {
                secret_ref: Some(KeyRef {
                    name: "beta-values".into(),
                    key: "values.yaml".into(),
                    optional: None,
                }),
                ..Overrides::default()
            }],
            ..ComponentSpec::default()
        },
    );
    h.create_stack(spec);
    assert!(h.converge().await.is_done());

    let owned = format!("{LABEL_MODULE_OWNER}=beta");
    let copies = h.ctx.stores.secrets.list(Some("beta-system"), Some(&owned)).await.unwrap();
    assert_eq!(copies.len(), 2);

    // Keep the Module around after delete, as a backend finalizer would
    h.memory.modules.hold(Some("beta-system"), "beta");
    h.update_spec(|spec| {
        spec.components.insert("beta".into(), enabled(false));
    });

    assert!(matches!(h.reconcile().await, ReconcileResult::Requeue(_)));
    assert!(h.ctx.stores.secrets.list(Some("beta-system"), Some(&owned)).await.unwrap().is_empty());
    let beta = h.module("beta").expect("beta still terminating");
    assert!(beta.metadata.deletion_timestamp.is_some());
    assert_eq!(h.status().components["beta"].state, ComponentState::Uninstalling);

    // Still terminating: not done
    assert!(matches!(h.reconcile().await, ReconcileResult::Requeue(_)));

    h.run_backend().await;
    assert!(h.reconcile().await.is_done());
    assert!(h.module("beta").is_none());
    let status = h.status();
    assert_eq!(status.components["beta"].state, ComponentState::Disabled);
    assert_eq!(status.components["alpha"].state, ComponentState::Ready);
    assert_eq!(status.components["alpha"].last_reconciled_generation, 2);
    // The user's original is never touched
    assert!(h.memory.secrets.contains(Some(STACK_NAMESPACE), "beta-values"));
}

#[tokio::test]
async fn test_uninstall_removes_modules_then_namespaces_then_finalizer() {
    let config = ControllerConfig {
        legacy_cluster_roles: vec!["stack-legacy".to_string()],
        ..ControllerConfig::default()
    };
    let h = Harness::with_config(REGISTRY, BOM_1_0, config);
    for ns in [STACK_NAMESPACE, "stack-system"] {
        h.memory.namespaces.upsert(namespace(ns)).unwrap();
    }
    h.create_stack(only(&["alpha"]));
    assert!(h.converge().await.is_done());

    let mut alpha_ns = namespace("alpha-system");
    alpha_ns.spec = Some(NamespaceSpec {
        finalizers: Some(vec!["kubernetes".to_string()]),
    });
    h.memory.namespaces.upsert(alpha_ns).unwrap();
    h.memory
        .config_maps
        .upsert(ConfigMap {
            metadata: ObjectMeta {
                name: Some(ROOT_CA_CONFIGMAP_NAME.to_string()),
                namespace: Some("alpha-system".to_string()),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        })
        .unwrap();
    h.memory
        .cluster_roles
        .upsert(ClusterRole {
            metadata: ObjectMeta {
                name: Some("stack-legacy".to_string()),
                ..ObjectMeta::default()
            },
            ..ClusterRole::default()
        })
        .unwrap();

    assert!(h.memory.secrets.contains(Some(STACK_NAMESPACE), REGISTRATION_SECRET_NAME));

    h.memory.modules.hold(Some("alpha-system"), "alpha");
    h.memory.namespaces.hold(None, "alpha-system");
    h.memory.stacks.hold(Some(STACK_NAMESPACE), STACK_NAME);
    h.ctx.stores.stacks.delete(Some(STACK_NAMESPACE), STACK_NAME).await.unwrap();

    // Modules first
    assert!(matches!(h.reconcile().await, ReconcileResult::Requeue(_)));
    let status = h.status();
    assert_eq!(status.state, Some(StackState::Uninstalling));
    assert_eq!(
        status.latest_of(OperationClass::Uninstall).map(|c| c.r#type),
        Some(ConditionType::UninstallStarted)
    );
    assert!(h.module("alpha").is_some_and(|m| m.metadata.deletion_timestamp.is_some()));
    assert!(!h.memory.secrets.contains(Some(STACK_NAMESPACE), REGISTRATION_SECRET_NAME));
    assert!(h.memory.namespaces.contains(None, "alpha-system"));
    assert!(h.stack().has_finalizer(FINALIZER));

    // Then namespaces, which may take a while to terminate
    h.run_backend().await;
    assert!(matches!(h.reconcile().await, ReconcileResult::Requeue(_)));
    assert!(h.module("alpha").is_none());
    let terminating = h.memory.namespaces.get_now(None, "alpha-system").unwrap();
    assert!(terminating.metadata.deletion_timestamp.is_some());
    assert!(terminating.spec.and_then(|s| s.finalizers).is_none());
    assert!(!h.memory.config_maps.contains(Some("alpha-system"), ROOT_CA_CONFIGMAP_NAME));
    assert!(!h.memory.cluster_roles.contains(None, "stack-legacy"));
    assert!(h.stack().has_finalizer(FINALIZER));

    h.memory.namespaces.release(None, "alpha-system");
    assert!(h.reconcile().await.is_done());
    assert!(!h.memory.namespaces.contains(None, "alpha-system"));
    assert!(h.memory.namespaces.contains(None, STACK_NAMESPACE));
    assert!(h.memory.namespaces.contains(None, "stack-system"));

    let stack = h.stack();
    assert!(!stack.has_finalizer(FINALIZER));
    assert_eq!(
        h.status().latest_of(OperationClass::Uninstall).map(|c| c.r#type),
        Some(ConditionType::UninstallComplete)
    );

    h.memory.stacks.release(Some(STACK_NAMESPACE), STACK_NAME);
    assert!(!h.memory.stacks.contains(Some(STACK_NAMESPACE), STACK_NAME));
}

#[tokio::test]
async fn test_concurrent_status_writers_lose_nothing() {
    let h = Harness::new(REGISTRY, BOM_1_0);
    h.create_stack(only(&["alpha"]));
    assert!(h.converge().await.is_done());
    assert_eq!(h.status().components["alpha"].available, None);

    let stack = h.stack();
    let mut tasks = Vec::new();
    for i in 0..16 {
        let updater = h.ctx.updater.clone();
        let event = UpdateEvent::for_stack(&stack)
            .with_component(format!("extra-{i}"), ComponentUpdate::available(true));
        tasks.push(tokio::spawn(async move { updater.enqueue(event).await }));
    }
    let reconcile_event = UpdateEvent::for_stack(&stack)
        .with_state(StackState::Reconciling)
        .with_condition(ConditionType::InstallStarted, "Install or update of components in progress");
    let (observed, queued) = tokio::join!(
        observe_once(&h.ctx),
        h.ctx.updater.enqueue(reconcile_event)
    );
    assert_eq!(observed.unwrap(), 1);
    queued.unwrap();
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    h.ctx.updater.flush().await.unwrap();

    let status = h.status();
    assert_eq!(status.components["alpha"].available, Some(true));
    assert_eq!(status.state, Some(StackState::Reconciling));
    assert_eq!(
        status.latest_of(OperationClass::Install).map(|c| c.r#type),
        Some(ConditionType::InstallStarted)
    );
    for i in 0..16 {
        assert_eq!(status.components[&format!("extra-{i}")].available, Some(true));
    }
}

#[tokio::test]
async fn test_availability_only_written_on_change() {
    let h = Harness::new(REGISTRY, BOM_1_0);
    h.create_stack(only(&["alpha"]));
    assert!(h.converge().await.is_done());

    assert_eq!(observe_once(&h.ctx).await.unwrap(), 1);
    h.ctx.updater.flush().await.unwrap();
    assert_eq!(observe_once(&h.ctx).await.unwrap(), 0);

    h.fail_module("alpha", "chart error");
    assert_eq!(observe_once(&h.ctx).await.unwrap(), 1);
    h.ctx.updater.flush().await.unwrap();
    assert_eq!(h.status().components["alpha"].available, Some(false));
}

#[tokio::test]
async fn test_status_writes_survive_conflicts_in_order() {
    let (h, flaky) = Harness::with_flaky_stacks(REGISTRY, BOM_1_0);
    let stack = h.create_stack(only(&["alpha"]));
    flaky.conflicts.store(4, Ordering::SeqCst);

    h.ctx
        .updater
        .enqueue(
            UpdateEvent::for_stack(&stack)
                .with_state(StackState::Reconciling)
                .with_condition(ConditionType::InstallStarted, "Install started"),
        )
        .await
        .unwrap();
    h.ctx
        .updater
        .enqueue(
            UpdateEvent::for_stack(&stack)
                .with_state(StackState::Ready)
                .with_condition(ConditionType::InstallComplete, "Install complete"),
        )
        .await
        .unwrap();
    h.ctx.updater.flush().await.unwrap();

    assert_eq!(flaky.conflicts.load(Ordering::SeqCst), 0);
    assert_eq!(flaky.written.load(Ordering::SeqCst), 2);
    let status = h.status();
    assert_eq!(status.state, Some(StackState::Ready));
    let types: Vec<_> = status.conditions.iter().map(|c| c.r#type).collect();
    assert_eq!(types, vec![ConditionType::InstallStarted, ConditionType::InstallComplete]);
}

#[tokio::test]
async fn test_dropped_completion_is_retried() {
    let (h, flaky) = Harness::with_flaky_stacks(REGISTRY, BOM_1_0);
    h.create_stack(only(&["alpha"]));
    assert!(matches!(h.reconcile().await, ReconcileResult::Requeue(_)));
    h.run_backend().await;

    // Every status write of the completing pass is dropped by the queue
    flaky.outage.store(true, Ordering::SeqCst);
    assert!(matches!(h.reconcile().await, ReconcileResult::Requeue(_)));
    let status = h.status();
    assert_eq!(status.state, Some(StackState::Reconciling));
    assert_eq!(status.version, None);

    flaky.outage.store(false, Ordering::SeqCst);
    assert!(h.reconcile().await.is_done());
    let status = h.status();
    assert_eq!(status.state, Some(StackState::Ready));
    assert_eq!(status.version.as_deref(), Some("1.0"));
    assert_eq!(
        status.latest_of(OperationClass::Install).map(|c| c.r#type),
        Some(ConditionType::InstallComplete)
    );
}
