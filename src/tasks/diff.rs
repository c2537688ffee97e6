use super::model::Task;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Task fields tracked by the change diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskField {
    Name,
    Description,
    Status,
    Priority,
    DueDate,
    EstimatedEffort,
    Labels,
    AssignedUserId,
    Locked,
    FinalStatus,
}

impl TaskField {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskField::Name => "name",
            TaskField::Description => "description",
            TaskField::Status => "status",
            TaskField::Priority => "priority",
            TaskField::DueDate => "dueDate",
            TaskField::EstimatedEffort => "estimatedEffort",
            TaskField::Labels => "labels",
            TaskField::AssignedUserId => "assignedUserId",
            TaskField::Locked => "locked",
            TaskField::FinalStatus => "finalStatus",
        }
    }
}

impl fmt::Display for TaskField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: TaskField,
    pub old_value: Value,
    pub new_value: Value,
}

/// Added/removed members between two sets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDiff<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
}

impl<T> SetDiff<T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub fn set_diff<T: Ord + Clone>(before: &BTreeSet<T>, after: &BTreeSet<T>) -> SetDiff<T> {
    SetDiff {
        added: after.difference(before).cloned().collect(),
        removed: before.difference(after).cloned().collect(),
    }
}

/// Field-level diff between the pre- and post-image of a mutation, in a stable field order.
/// `version` and timestamps are bookkeeping and never reported.
pub fn diff_tasks(before: &Task, after: &Task) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    let mut track = |field: TaskField, old: Value, new: Value| {
        if old != new {
            changes.push(FieldChange {
                field,
                old_value: old,
                new_value: new,
            });
        }
    };

    track(TaskField::Name, json!(before.name), json!(after.name));
    track(
        TaskField::Description,
        json!(before.description),
        json!(after.description),
    );
    track(TaskField::Status, json!(before.status), json!(after.status));
    track(TaskField::Priority, json!(before.priority), json!(after.priority));
    track(TaskField::DueDate, json!(before.due_date), json!(after.due_date));
    track(
        TaskField::EstimatedEffort,
        json!(before.estimated_effort),
        json!(after.estimated_effort),
    );
    track(TaskField::Labels, json!(before.labels), json!(after.labels));
    track(
        TaskField::AssignedUserId,
        json!(before.assigned_user),
        json!(after.assigned_user),
    );
    track(TaskField::Locked, json!(before.locked), json!(after.locked));
    track(
        TaskField::FinalStatus,
        json!(before.final_status),
        json!(after.final_status),
    );

    changes
}
