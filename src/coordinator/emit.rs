use crate::events::{DomainEvent, EventKind};
use crate::tasks::{diff_tasks, set_diff, Task, TaskField, UserId};
use serde_json::{json, Value};
use std::sync::Arc;

/// How a status change is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusChange {
    /// Normal forward transition: TASK_STATUS_CHANGED
    Transition,
    /// Permission-gated reversion: STATUS_REVERTED only
    Reversion,
}

/// Events describing the difference between `before` and `after`: one TASK_UPDATED per
/// changed field, then the structural events (status, assignment, labels, lock, watchers).
pub(crate) fn mutation_events(
    before: &Task,
    after: &Arc<Task>,
    actor: UserId,
    status_change: StatusChange,
    correlation_id: &str,
) -> Vec<DomainEvent> {
    let new_event = |kind: EventKind| {
        DomainEvent::new(kind, Arc::clone(after), actor).with_correlation_id(Some(correlation_id))
    };
    let mut events = Vec::new();

    for change in diff_tasks(before, after) {
        if change.field == TaskField::Status && status_change == StatusChange::Reversion {
            continue;
        }
        events.push(
            new_event(EventKind::TaskUpdated)
                .with_field(change.field)
                .with_values(change.old_value.clone(), change.new_value.clone())
                .with_metadata("action", format!("{}_UPDATED", change.field.as_str().to_uppercase())),
        );
    }

    if before.status != after.status {
        let kind = match status_change {
            StatusChange::Transition => EventKind::TaskStatusChanged,
            StatusChange::Reversion => EventKind::StatusReverted,
        };
        events.push(
            new_event(kind)
                .with_field(TaskField::Status)
                .with_values(json!(before.status), json!(after.status)),
        );
    }

    if before.assigned_user != after.assigned_user {
        events.push(
            new_event(EventKind::TaskAssigned)
                .with_field(TaskField::AssignedUserId)
                .with_values(json!(before.assigned_user), json!(after.assigned_user)),
        );
    }

    let labels = set_diff(&before.labels, &after.labels);
    for label in labels.added {
        events.push(new_event(EventKind::LabelAdded).with_metadata("label", label));
    }
    for label in labels.removed {
        events.push(new_event(EventKind::LabelRemoved).with_metadata("label", label));
    }

    if before.locked != after.locked {
        let kind = if after.locked {
            EventKind::TaskLocked
        } else {
            EventKind::TaskUnlocked
        };
        events.push(new_event(kind));
    }

    let watchers = set_diff(&before.watchers, &after.watchers);
    for watcher in watchers.added {
        events.push(new_event(EventKind::WatcherAdded).with_metadata("watcherId", watcher.0));
    }
    for watcher in watchers.removed {
        events.push(new_event(EventKind::WatcherRemoved).with_metadata("watcherId", watcher.0));
    }

    events
}

/// TASK_CREATED followed by WATCHER_ADDED for each initial watcher
pub(crate) fn creation_events(task: &Arc<Task>, actor: UserId, correlation_id: &str) -> Vec<DomainEvent> {
    let mut events = vec![DomainEvent::new(EventKind::TaskCreated, Arc::clone(task), actor)
        .with_correlation_id(Some(correlation_id))
        .with_metadata("taskName", task.name.clone())];

    events.extend(task.watchers.iter().map(|watcher| {
        DomainEvent::new(EventKind::WatcherAdded, Arc::clone(task), actor)
            .with_correlation_id(Some(correlation_id))
            .with_metadata("watcherId", watcher.0)
    }));
    events
}

pub(crate) fn deletion_event(task: &Arc<Task>, actor: UserId, correlation_id: &str) -> DomainEvent {
    DomainEvent::new(EventKind::TaskDeleted, Arc::clone(task), actor)
        .with_correlation_id(Some(correlation_id))
        .with_metadata("taskName", Value::String(task.name.clone()))
}
