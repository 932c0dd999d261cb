//! Common test utilities for reconcile tests
//!
//! Provides an operator wired to in-memory stores, plus a stand-in for the
//! Module backend that reports Modules as applied.

#![allow(dead_code, reason = "not every test binary uses every helper")]

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use stack_operator::bom::Bom;
use stack_operator::config::ControllerConfig;
use stack_operator::controller::reconciler::{reconcile, ReconcileResult, Reconciler};
use stack_operator::controller::status_updater::{StatusUpdater, UpdaterSettings};
use stack_operator::crd::{
    ComponentSpec, Module, ModuleCondition, ModuleStatus, Stack, StackSpec, StackStatus, MODULE_READY,
    MODULE_REASON_FAILED,
};
use stack_operator::profile::ProfileResolver;
use stack_operator::registry::Registry;
use stack_operator::store::{MemoryStore, MemoryStores, ObjectStore, StoreError, StoreResult};
use std::collections::BTreeMap;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const STACK_NAME: &str = "platform";
pub const STACK_NAMESPACE: &str = "stack-install";

/// alpha and beta are on by default; gamma is off and detected through its Deployment
pub const REGISTRY: &str = r"
- name: alpha
  namespace: alpha-system
  enabledByDefault: true
- name: beta
  namespace: beta-system
  enabledByDefault: true
  dependencies: [alpha]
- name: gamma
  namespace: gamma-system
  installedProbe:
    type: deployment
    name: gamma-controller
";

pub const BOM_1_0: &str = r#"
version: "1.0"
components:
  - name: alpha
    version: "1.0"
  - name: beta
    version: "1.0"
  - name: gamma
    version: "1.0"
"#;

pub const BOM_1_1: &str = r#"
version: "1.1"
components:
  - name: alpha
    version: "1.1"
  - name: beta
    version: "1.1"
  - name: gamma
    version: "1.1"
"#;

pub struct Harness {
    pub memory: MemoryStores,
    pub ctx: Reconciler,
}

impl Harness {
    pub fn new(registry: &str, bom: &str) -> Self {
        Self::with_config(registry, bom, ControllerConfig::default())
    }

    pub fn with_config(registry: &str, bom: &str, config: ControllerConfig) -> Self {
        let memory = MemoryStores::new();
        let stacks = memory.stores().stacks;
        Self::build(memory, stacks, registry, bom, config)
    }

    /// Route every Stack read and write, status queue included, through a
    /// [`FlakyStacks`] the caller can switch into failure modes
    pub fn with_flaky_stacks(registry: &str, bom: &str) -> (Self, Arc<FlakyStacks>) {
        let memory = MemoryStores::new();
        let flaky = Arc::new(FlakyStacks::new(Arc::clone(&memory.stacks)));
        let stacks = Arc::clone(&flaky) as Arc<dyn ObjectStore<Stack>>;
        (Self::build(memory, stacks, registry, bom, ControllerConfig::default()), flaky)
    }

    fn build(
        memory: MemoryStores,
        stacks: Arc<dyn ObjectStore<Stack>>,
        registry: &str,
        bom: &str,
        config: ControllerConfig,
    ) -> Self {
        let mut stores = memory.stores();
        stores.stacks = Arc::clone(&stacks);
        let updater = StatusUpdater::new(
            stacks,
            UpdaterSettings {
                capacity: 8,
                conflict_delay: Duration::from_millis(1),
                max_api_retries: 3,
            },
        );
        updater.start().unwrap();
        let ctx = Reconciler::new(
            stores,
            Arc::new(Registry::from_yaml(registry).unwrap()),
            Arc::new(ProfileResolver::empty()),
            Bom::from_yaml(bom).unwrap(),
            updater,
            config,
        );
        Self { memory, ctx }
    }

    /// Swap in a newer bundled manifest, as a new operator build would
    pub fn rebundle(&mut self, bom: &str) {
        let bom = Bom::from_yaml(bom).unwrap();
        self.ctx.bom_version = bom.version.clone();
        self.ctx.catalog = Arc::new(bom);
    }

    pub fn create_stack(&self, spec: StackSpec) -> Stack {
        let mut stack = Stack::new(STACK_NAME, spec);
        stack.metadata.namespace = Some(STACK_NAMESPACE.to_string());
        self.memory.stacks.upsert(stack).unwrap()
    }

    pub fn stack(&self) -> Stack {
        self.memory
            .stacks
            .get_now(Some(STACK_NAMESPACE), STACK_NAME)
            .expect("stack exists")
    }

    pub fn status(&self) -> StackStatus {
        self.stack().status.unwrap_or_default()
    }

    /// Edit the spec the way `kubectl apply` would, bumping the generation
    pub fn update_spec(&self, edit: impl FnOnce(&mut StackSpec)) {
        let mut stack = self.stack();
        edit(&mut stack.spec);
        stack.metadata.generation = Some(stack.generation() + 1);
        self.memory.stacks.upsert(stack).unwrap();
    }

    /// One reconcile of the current Stack, with its status writes applied
    pub async fn reconcile(&self) -> ReconcileResult {
        let stack = self.stack();
        let result = reconcile(&stack, &self.ctx).await;
        self.ctx.updater.flush().await.unwrap();
        result
    }

    /// Alternate reconciles and backend passes until the reconcile is done
    pub async fn converge(&self) -> ReconcileResult {
        for _ in 0..10 {
            let result = self.reconcile().await;
            if !matches!(result, ReconcileResult::Requeue(_)) {
                return result;
            }
            self.run_backend().await;
        }
        panic!("stack did not converge");
    }

    pub fn module(&self, name: &str) -> Option<Module> {
        self.memory
            .modules
            .all()
            .into_iter()
            .find(|m| m.name_any() == name)
    }

    /// Play the Module backend: finish pending deletions (removing the
    /// Deployments the Module owned) and report every other Module as applied.
    /// Modules already marked failed are left alone.
    pub async fn run_backend(&self) {
        for module in self.memory.modules.all() {
            let namespace = module.namespace();
            let name = module.name_any();
            if module.metadata.deletion_timestamp.is_some() {
                for deployment in self.memory.deployments.all() {
                    if deployment.namespace().as_deref() == Some(module.spec.target_namespace.as_str()) {
                        self.memory
                            .deployments
                            .delete(deployment.namespace().as_deref(), &deployment.name_any())
                            .await
                            .unwrap();
                    }
                }
                self.memory.modules.release(namespace.as_deref(), &name);
                continue;
            }
            if module.is_converged() || module.is_failed() {
                continue;
            }
            let mut applied = module.clone();
            applied.status = Some(ModuleStatus {
                conditions: vec![module_condition("True", None, None)],
                last_successful_generation: module.metadata.generation,
                last_successful_version: Some(module.spec.version.clone()),
            });
            self.memory.modules.upsert(applied).unwrap();
        }
    }

    /// Report the Module as failed by its backend
    pub fn fail_module(&self, name: &str, message: &str) {
        let mut module = self.module(name).expect("module exists");
        module.status = Some(ModuleStatus {
            conditions: vec![module_condition("False", Some(MODULE_REASON_FAILED), Some(message))],
            ..ModuleStatus::default()
        });
        self.memory.modules.upsert(module).unwrap();
    }

    /// Resource versions of every Module and of the Stack, for no-write checks
    pub fn versions(&self) -> BTreeMap<String, Option<String>> {
        let mut versions: BTreeMap<String, Option<String>> = self
            .memory
            .modules
            .all()
            .into_iter()
            .map(|m| (format!("module/{}", m.name_any()), m.metadata.resource_version))
            .collect();
        versions.insert("stack".to_string(), self.stack().metadata.resource_version);
        for secret in self.memory.secrets.all() {
            versions.insert(
                format!("secret/{}/{}", secret.namespace().unwrap_or_default(), secret.name_any()),
                secret.metadata.resource_version,
            );
        }
        versions
    }
}

fn module_condition(status: &str, reason: Option<&str>, message: Option<&str>) -> ModuleCondition {
    ModuleCondition {
        r#type: MODULE_READY.to_string(),
        status: status.to_string(),
        reason: reason.map(str::to_string),
        message: message.map(str::to_string),
        last_transition_time: None,
    }
}

pub fn enabled(on: bool) -> ComponentSpec {
    ComponentSpec {
        enabled: Some(on),
        ..ComponentSpec::default()
    }
}

pub fn only(components: &[&str]) -> StackSpec {
    let mut spec = StackSpec::default();
    for name in ["alpha", "beta", "gamma"] {
        spec.components
            .insert(name.to_string(), enabled(components.contains(&name)));
    }
    spec
}

pub fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}

pub fn secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Secret::default()
    }
}

pub fn deployment(namespace: &str, name: &str, labels: &[(&str, &str)]) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            ),
            ..ObjectMeta::default()
        },
        spec: Some(DeploymentSpec::default()),
        ..Deployment::default()
    }
}

/// Stack store whose status writes can be made to fail
#[derive(Debug)]
pub struct FlakyStacks {
    pub inner: Arc<MemoryStore<Stack>>,
    /// Status writes still to be rejected with a conflict
    pub conflicts: AtomicUsize,
    /// While set, status writes fail with an API error
    pub outage: AtomicBool,
    /// Status writes that reached the inner store
    pub written: AtomicUsize,
}

impl FlakyStacks {
    pub fn new(inner: Arc<MemoryStore<Stack>>) -> Self {
        Self {
            inner,
            conflicts: AtomicUsize::new(0),
            outage: AtomicBool::new(false),
            written: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ObjectStore<Stack> for FlakyStacks {
    async fn get(&self, namespace: Option<&str>, name: &str) -> StoreResult<Option<Stack>> {
        self.inner.get(namespace, name).await
    }

    async fn list(&self, namespace: Option<&str>, label_selector: Option<&str>) -> StoreResult<Vec<Stack>> {
        self.inner.list(namespace, label_selector).await
    }

    async fn create(&self, obj: &Stack) -> StoreResult<Stack> {
        self.inner.create(obj).await
    }

    async fn replace(&self, obj: &Stack) -> StoreResult<Stack> {
        self.inner.replace(obj).await
    }

    async fn replace_status(&self, obj: &Stack) -> StoreResult<Stack> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(StoreError::Api("connection refused".to_string()));
        }
        let pending = self.conflicts.load(Ordering::SeqCst);
        if pending > 0 {
            self.conflicts.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Conflict {
                kind: "Stack".to_string(),
                key: obj.metadata.name.clone().unwrap_or_default(),
            });
        }
        let written = self.inner.replace_status(obj).await?;
        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(written)
    }

    async fn delete(&self, namespace: Option<&str>, name: &str) -> StoreResult<bool> {
        self.inner.delete(namespace, name).await
    }
}
