//! # Stack Status
//!
//! Observed state of a Stack: aggregate state, applied version, the
//! condition log and one record per component.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Status of the Stack resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StackStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StackState>,
    /// Last version applied successfully
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Append-mostly condition log; the most recent entry is last
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentStatus>,
}

/// Aggregate state of the Stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum StackState {
    Reconciling,
    Upgrading,
    Uninstalling,
    Ready,
    Failed,
}

impl fmt::Display for StackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Condition types; each belongs to one operation class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ConditionType {
    InstallStarted,
    InstallComplete,
    InstallFailed,
    UpgradeStarted,
    UpgradeComplete,
    UpgradeFailed,
    UpgradePaused,
    UninstallStarted,
    UninstallComplete,
    UninstallFailed,
}

/// Operation class a condition type belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    Install,
    Upgrade,
    Uninstall,
}

impl ConditionType {
    #[must_use]
    pub fn class(self) -> OperationClass {
        match self {
            ConditionType::InstallStarted
            | ConditionType::InstallComplete
            | ConditionType::InstallFailed => OperationClass::Install,
            ConditionType::UpgradeStarted
            | ConditionType::UpgradeComplete
            | ConditionType::UpgradeFailed
            | ConditionType::UpgradePaused => OperationClass::Upgrade,
            ConditionType::UninstallStarted
            | ConditionType::UninstallComplete
            | ConditionType::UninstallFailed => OperationClass::Uninstall,
        }
    }

    #[must_use]
    pub fn is_started(self) -> bool {
        matches!(
            self,
            ConditionType::InstallStarted
                | ConditionType::UpgradeStarted
                | ConditionType::UninstallStarted
        )
    }

    /// Complete, Failed and Paused all end a cycle
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !self.is_started()
    }

    #[must_use]
    pub fn started_for(class: OperationClass) -> Self {
        match class {
            OperationClass::Install => ConditionType::InstallStarted,
            OperationClass::Upgrade => ConditionType::UpgradeStarted,
            OperationClass::Uninstall => ConditionType::UninstallStarted,
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One entry of the condition log
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: ConditionType,
    /// "True" or "False"
    pub status: String,
    #[serde(default)]
    pub message: String,
    /// RFC3339 timestamp, second precision
    #[serde(default)]
    pub last_transition_time: String,
}

impl Condition {
    /// A `True` condition stamped with the current time
    #[must_use]
    pub fn new(r#type: ConditionType, message: impl Into<String>) -> Self {
        Self {
            r#type,
            status: "True".to_string(),
            message: message.into(),
            last_transition_time: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }
    }
}

/// Per-component state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ComponentState {
    #[default]
    Disabled,
    Installing,
    Reconciling,
    Upgrading,
    Uninstalling,
    Ready,
    Failed,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Status of one component
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    #[serde(default)]
    pub state: ComponentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<bool>,
    /// Stack generation this component last verifiably converged for
    #[serde(default)]
    pub last_reconciled_generation: i64,
}

impl StackStatus {
    /// Most recent condition of the given class
    #[must_use]
    pub fn latest_of(&self, class: OperationClass) -> Option<&Condition> {
        self.conditions
            .iter()
            .rev()
            .find(|c| c.r#type.class() == class)
    }

    #[must_use]
    pub fn has_condition(&self, r#type: ConditionType) -> bool {
        self.conditions.iter().any(|c| c.r#type == r#type)
    }

    #[must_use]
    pub fn count_of(&self, r#type: ConditionType) -> usize {
        self.conditions.iter().filter(|c| c.r#type == r#type).count()
    }
}
