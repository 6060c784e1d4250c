// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-task deployment configuration.
//!
//! A [`TaskConfiguration`] is authored alongside the process diagram and
//! matched to a task by id at deploy time. Matching plain tasks are promoted
//! to user tasks and annotated with assignment, priority, due-date and form
//! metadata; see [`crate::transform`] for the injection rules.

use serde::{Deserialize, Serialize};

/// Who a configured task is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssigneeType {
    /// A single named user.
    User,
    /// A named group of users.
    Group,
    /// An organizational entity, mapped to candidate groups.
    Entity,
}

/// Deploy-time configuration overlay for a single task.
///
/// All fields are optional so partially-filled configurations deserialize
/// without error; unset fields simply contribute nothing to the transform.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskConfiguration {
    /// Id of the task element this configuration targets.
    pub task_id: String,
    /// Display name override carried for audit purposes.
    pub task_name: Option<String>,
    /// Explicit assignment channel. When set together with the matching
    /// target field, it is authoritative and no fallback applies.
    pub assignee_type: Option<AssigneeType>,
    /// Target for user assignment.
    pub assignee_user: Option<String>,
    /// Target for group assignment.
    pub assignee_group: Option<String>,
    /// Target for entity (candidate group) assignment.
    pub assignee_entity: Option<String>,
    /// User accountable for the task outcome.
    pub responsible_user: Option<String>,
    /// User kept informed about the task.
    pub interested_user: Option<String>,
    /// Task priority, passed through verbatim.
    pub priority: Option<String>,
    /// Magnitude of the task duration.
    pub duration_value: Option<i64>,
    /// Unit of the task duration (hours/days/weeks/months, with French
    /// synonyms accepted).
    pub duration_unit: Option<String>,
    /// Whether to attach an embedded form resource to the task.
    pub add_form_resource: bool,
    /// Whether to notify the assignee when the task is created.
    pub notify_on_creation: bool,
    /// Whether to notify the assignee when the task deadline passes.
    pub notify_on_deadline: bool,
    /// Days before the deadline at which to send a reminder.
    pub reminder_before_deadline: Option<i64>,
    /// Conditions evaluated before the task becomes available.
    pub entry_conditions: Vec<String>,
    /// Conditions evaluated when the task completes.
    pub exit_conditions: Vec<String>,
}

impl TaskConfiguration {
    /// Whether this configuration names any assignment target at all.
    pub fn has_assignment(&self) -> bool {
        self.assignee_user.is_some()
            || self.assignee_group.is_some()
            || self.assignee_entity.is_some()
    }
}

/// Convert a duration to whole days for due-date computation.
///
/// Hours round up to at least one day; unknown units pass the value through
/// unchanged. French unit names are accepted alongside English ones.
pub fn duration_to_days(value: i64, unit: &str) -> i64 {
    match unit.trim().to_lowercase().as_str() {
        "hours" | "hour" | "heures" | "heure" => ((value + 23).div_euclid(24)).max(1),
        "days" | "day" | "jours" | "jour" => value,
        "weeks" | "week" | "semaines" | "semaine" => value * 7,
        "months" | "month" | "mois" => value * 30,
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_partial_configuration() {
        let json = r#"{"taskId": "Task_1", "assigneeType": "user", "assigneeUser": "alice"}"#;
        let config: TaskConfiguration = serde_json::from_str(json).unwrap();
        assert_eq!(config.task_id, "Task_1");
        assert_eq!(config.assignee_type, Some(AssigneeType::User));
        assert_eq!(config.assignee_user.as_deref(), Some("alice"));
        assert!(config.priority.is_none());
        assert!(config.entry_conditions.is_empty());
        assert!(!config.add_form_resource);
    }

    #[test]
    fn has_assignment_checks_all_channels() {
        let mut config = TaskConfiguration::default();
        assert!(!config.has_assignment());
        config.assignee_entity = Some("finance".into());
        assert!(config.has_assignment());
    }

    #[test]
    fn hours_round_up_to_full_days() {
        assert_eq!(duration_to_days(1, "hours"), 1);
        assert_eq!(duration_to_days(24, "hours"), 1);
        assert_eq!(duration_to_days(25, "hours"), 2);
        assert_eq!(duration_to_days(48, "heures"), 2);
    }

    #[test]
    fn calendar_units_multiply() {
        assert_eq!(duration_to_days(3, "days"), 3);
        assert_eq!(duration_to_days(2, "weeks"), 14);
        assert_eq!(duration_to_days(1, "mois"), 30);
        assert_eq!(duration_to_days(2, "semaines"), 14);
    }

    #[test]
    fn unknown_unit_passes_through() {
        assert_eq!(duration_to_days(5, "fortnights"), 5);
    }
}
