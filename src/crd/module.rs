//! # Module
//!
//! Per-component sub-resource. The operator owns `spec`; the Module backend
//! owns `status` and reports what it last applied.

use serde::{Deserialize, Serialize};

/// Module Custom Resource Definition
#[derive(kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Module",
    group = "platform.stackops.io",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::ModuleStatus",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ModuleSpec {
    pub module_name: String,
    pub target_namespace: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::crd::preserve_unknown_fields")]
    pub values: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_from: Vec<ValuesFromSource>,
}

/// External value source; exactly one of the references is set
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValuesFromSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<crate::crd::KeyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<crate::crd::KeyRef>,
}

/// Status reported by the Module backend
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStatus {
    #[serde(default)]
    pub conditions: Vec<ModuleCondition>,
    /// Module generation the backend last applied successfully
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModuleCondition {
    pub r#type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Condition type the backend uses to report readiness
pub const MODULE_READY: &str = "Ready";

/// Reason the backend sets on a `Ready=False` condition when it gave up
pub const MODULE_REASON_FAILED: &str = "Failed";

impl Module {
    #[must_use]
    pub fn ready_condition(&self) -> Option<&ModuleCondition> {
        self.status
            .as_ref()
            .and_then(|s| s.conditions.iter().find(|c| c.r#type == MODULE_READY))
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready_condition().is_some_and(|c| c.status == "True")
    }

    /// The backend reported a terminal failure for the current spec
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.ready_condition().is_some_and(|c| {
            c.status == "False" && c.reason.as_deref() == Some(MODULE_REASON_FAILED)
        })
    }

    /// Ready for the generation and version currently in spec
    #[must_use]
    pub fn is_converged(&self) -> bool {
        let Some(status) = self.status.as_ref() else {
            return false;
        };
        self.is_ready()
            && status.last_successful_generation.is_some()
            && status.last_successful_generation == self.metadata.generation
            && status.last_successful_version.as_deref() == Some(self.spec.version.as_str())
    }

    #[must_use]
    pub fn failure_message(&self) -> Option<String> {
        self.is_failed()
            .then(|| self.ready_condition().and_then(|c| c.message.clone()))
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(generation: i64, ready: &str, last_gen: Option<i64>, last_version: &str) -> Module {
        let mut m = Module::new(
            "alpha",
            ModuleSpec {
                module_name: "alpha".into(),
                target_namespace: "alpha".into(),
                version: "1.0".into(),
                ..ModuleSpec::default()
            },
        );
        m.metadata.generation = Some(generation);
        m.status = Some(ModuleStatus {
            conditions: vec![ModuleCondition {
                r#type: MODULE_READY.into(),
                status: ready.into(),
                ..ModuleCondition::default()
            }],
            last_successful_generation: last_gen,
            last_successful_version: Some(last_version.into()),
        });
        m
    }

    #[test]
    fn test_converged_requires_matching_generation_and_version() {
        assert!(module(2, "True", Some(2), "1.0").is_converged());
        assert!(!module(3, "True", Some(2), "1.0").is_converged());
        assert!(!module(2, "True", Some(2), "0.9").is_converged());
        assert!(!module(2, "False", Some(2), "1.0").is_converged());
        assert!(!module(2, "True", None, "1.0").is_converged());
    }

    #[test]
    fn test_failed_needs_failed_reason() {
        let mut m = module(1, "False", None, "1.0");
        assert!(!m.is_failed());
        if let Some(status) = m.status.as_mut() {
            status.conditions[0].reason = Some(MODULE_REASON_FAILED.into());
            status.conditions[0].message = Some("chart error".into());
        }
        assert!(m.is_failed());
        assert_eq!(m.failure_message().as_deref(), Some("chart error"));
    }
}
