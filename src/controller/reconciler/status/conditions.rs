//! # Condition Log
//!
//! Conditions come in cycles per operation class: one Started followed by one
//! terminal (Complete, Failed or Paused). The log keeps the most recent entry
//! last and only grows while a cycle is open.

use crate::crd::{Condition, ConditionType, StackStatus};

/// Append `condition` to the log unless it would repeat the class's current
/// position in its cycle. Returns `true` when the log changed.
///
/// - a Started is dropped when the class's latest entry is already Started;
///   otherwise a finished cycle of that class is pruned first
/// - a terminal is dropped when the class's latest entry is the same terminal
/// - `UpgradeFailed` entries survive pruning so repeated upgrade failures can
///   be counted; an `UpgradeComplete` clears them
pub fn append_condition(status: &mut StackStatus, condition: Condition) -> bool {
    let kind = condition.r#type;
    let class = kind.class();
    let latest = status.latest_of(class).map(|c| c.r#type);

    if kind.is_started() {
        if latest.is_some_and(ConditionType::is_started) {
            return false;
        }
        let finished = status
            .conditions
            .iter()
            .any(|c| c.r#type.class() == class && c.r#type.is_terminal());
        if finished {
            status
                .conditions
                .retain(|c| c.r#type.class() != class || c.r#type == ConditionType::UpgradeFailed);
        }
    } else {
        if latest == Some(kind) {
            return false;
        }
        if kind == ConditionType::UpgradeComplete {
            status
                .conditions
                .retain(|c| c.r#type != ConditionType::UpgradeFailed);
        }
    }

    status.conditions.push(condition);
    true
}

/// Number of upgrade attempts that ended in failure since the last successful upgrade
#[must_use]
pub fn upgrade_failures(status: &StackStatus) -> usize {
    status.count_of(ConditionType::UpgradeFailed)
}
