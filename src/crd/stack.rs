//! # Stack Spec
//!
//! The user-facing resource describing the whole platform stack.

use crate::crd::overrides::{LegacyOverride, Overrides};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stack Custom Resource Definition
///
/// One Stack describes the desired set of platform components. The operator
/// turns it into one `Module` per component and reports aggregate progress in
/// `status`.
///
/// # Example
///
/// ```yaml
/// apiVersion: platform.stackops.io/v1alpha1
/// kind: Stack
/// metadata:
///   name: platform
///   namespace: stack-install
/// spec:
///   profile: prod
///   components:
///     ingress:
///       enabled: true
///       overrides:
///         - values:
///             replicas: 2
///         - secretRef:
///             name: ingress-tls-values
///             key: values.yaml
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Stack",
    group = "platform.stackops.io",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::StackStatus",
    shortname = "stk",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}, {"name":"Version", "type":"string", "jsonPath":".status.version"}, {"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StackSpec {
    /// Target version. Setting it to a newer release requests an upgrade.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Profile supplying default component settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Per-component settings keyed by component name
    #[serde(default)]
    pub components: BTreeMap<String, ComponentSpec>,
}

/// Settings of one component
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// When false, a Module that already exists is left alone outside upgrades
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_changes: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<Overrides>,
    /// Older override shape, still accepted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_overrides: Vec<LegacyOverride>,
    /// Settings rendered by the operator into the component's generated values Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::crd::preserve_unknown_fields")]
    pub config: Option<serde_json::Value>,
}

impl Stack {
    /// `namespace/name`, used in logs and as the updater key
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.metadata.namespace.as_deref().unwrap_or("default"),
            self.metadata.name.as_deref().unwrap_or("unknown")
        )
    }

    #[must_use]
    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or_default()
    }

    /// Requested target version, treating an empty string as unset
    #[must_use]
    pub fn spec_version(&self) -> Option<&str> {
        self.spec.version.as_deref().filter(|v| !v.is_empty())
    }

    #[must_use]
    pub fn status_version(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.version.as_deref())
            .filter(|v| !v.is_empty())
    }

    /// An upgrade cycle is one where a target version is set and differs from the applied one
    #[must_use]
    pub fn is_upgrading(&self) -> bool {
        match self.spec_version() {
            Some(target) => Some(target) != self.status_version(),
            None => false,
        }
    }

    #[must_use]
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    #[must_use]
    pub fn has_finalizer(&self, token: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|t| t == token))
    }

    #[must_use]
    pub fn component(&self, name: &str) -> Option<&ComponentSpec> {
        self.spec.components.get(name)
    }
}
