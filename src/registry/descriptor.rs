//! Data-driven components loaded from the registry YAML.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Component, ComponentContext};
use crate::crd::Stack;
use crate::store::StoreResult;

fn default_true() -> bool {
    true
}

/// How to tell whether a component is already installed
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InstalledProbe {
    /// A Module exists and has applied some version
    #[default]
    Module,
    /// A Deployment of this name exists in the component namespace
    Deployment { name: String },
    Never,
}

/// How to tell whether a component is ready
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ReadinessProbe {
    /// The Module reports `Ready=True`
    #[default]
    Module,
    /// Every replica of this Deployment is ready
    Deployment { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDescriptor {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub enabled_by_default: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default = "default_true")]
    pub uses_module: bool,
    #[serde(default = "default_true")]
    pub operator_install: bool,
    #[serde(default)]
    pub required_secrets: Vec<String>,
    #[serde(default)]
    pub installed_probe: InstalledProbe,
    #[serde(default)]
    pub readiness_probe: ReadinessProbe,
}

#[derive(Debug, Clone)]
pub struct DescriptorComponent {
    descriptor: ComponentDescriptor,
}

impl DescriptorComponent {
    #[must_use]
    pub fn new(descriptor: ComponentDescriptor) -> Self {
        Self { descriptor }
    }

    async fn deployment_ready(&self, ctx: ComponentContext<'_>, name: &str) -> StoreResult<bool> {
        let deployment = ctx
            .stores
            .deployments
            .get(Some(&self.descriptor.namespace), name)
            .await?;
        Ok(deployment.is_some_and(|d| {
            let want = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            let ready = d.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
            ready >= want
        }))
    }
}

#[async_trait]
impl Component for DescriptorComponent {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn namespace(&self) -> &str {
        &self.descriptor.namespace
    }

    fn dependencies(&self) -> &[String] {
        &self.descriptor.dependencies
    }

    fn should_use_module(&self) -> bool {
        self.descriptor.uses_module
    }

    fn is_operator_install_supported(&self) -> bool {
        self.descriptor.operator_install
    }

    fn is_enabled(&self, effective: &Stack) -> bool {
        effective
            .component(&self.descriptor.name)
            .and_then(|c| c.enabled)
            .unwrap_or(self.descriptor.enabled_by_default)
    }

    fn monitor_overrides(&self, effective: &Stack) -> bool {
        effective
            .component(&self.descriptor.name)
            .and_then(|c| c.monitor_changes)
            .unwrap_or(true)
    }

    fn required_secrets(&self) -> &[String] {
        &self.descriptor.required_secrets
    }

    fn module_config(&self, effective: &Stack) -> Option<Value> {
        effective
            .component(&self.descriptor.name)
            .and_then(|c| c.config.clone())
            .filter(|v| !v.is_null())
    }

    async fn is_installed(&self, ctx: ComponentContext<'_>) -> StoreResult<bool> {
        match &self.descriptor.installed_probe {
            InstalledProbe::Module => {
                let module = ctx
                    .stores
                    .modules
                    .get(Some(&self.descriptor.namespace), &self.descriptor.name)
                    .await?;
                Ok(module.is_some_and(|m| {
                    m.status
                        .as_ref()
                        .is_some_and(|s| s.last_successful_version.is_some())
                }))
            }
            InstalledProbe::Deployment { name } => Ok(ctx
                .stores
                .deployments
                .get(Some(&self.descriptor.namespace), name)
                .await?
                .is_some()),
            InstalledProbe::Never => Ok(false),
        }
    }

    async fn is_ready(&self, ctx: ComponentContext<'_>) -> StoreResult<bool> {
        match &self.descriptor.readiness_probe {
            ReadinessProbe::Module => Ok(ctx
                .stores
                .modules
                .get(Some(&self.descriptor.namespace), &self.descriptor.name)
                .await?
                .is_some_and(|m| m.is_ready())),
            ReadinessProbe::Deployment { name } => self.deployment_ready(ctx, name).await,
        }
    }
}
