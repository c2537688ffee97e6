use crate::tasks::{Task, TaskField, TaskId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    TaskAssigned,
    TaskStatusChanged,
    StatusReverted,
    TaskLocked,
    TaskUnlocked,
    WatcherAdded,
    WatcherRemoved,
    LabelAdded,
    LabelRemoved,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::TaskCreated => "TASK_CREATED",
            EventKind::TaskUpdated => "TASK_UPDATED",
            EventKind::TaskDeleted => "TASK_DELETED",
            EventKind::TaskAssigned => "TASK_ASSIGNED",
            EventKind::TaskStatusChanged => "TASK_STATUS_CHANGED",
            EventKind::StatusReverted => "STATUS_REVERTED",
            EventKind::TaskLocked => "TASK_LOCKED",
            EventKind::TaskUnlocked => "TASK_UNLOCKED",
            EventKind::WatcherAdded => "WATCHER_ADDED",
            EventKind::WatcherRemoved => "WATCHER_REMOVED",
            EventKind::LabelAdded => "LABEL_ADDED",
            EventKind::LabelRemoved => "LABEL_REMOVED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one mutation, shared by every subscriber.
#[derive(Debug, Clone)]
pub struct DomainEvent {
    pub id: Uuid,
    pub kind: EventKind,
    /// Post-image of the task this event belongs to
    pub task: Arc<Task>,
    pub actor: UserId,
    pub field: Option<TaskField>,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub metadata: Map<String, Value>,
    pub correlation_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(kind: EventKind, task: Arc<Task>, actor: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            task,
            actor,
            field: None,
            old_value: None,
            new_value: None,
            metadata: Map::new(),
            correlation_id: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_field(mut self, field: TaskField) -> Self {
        self.field = Some(field);
        self
    }

    pub fn with_values(mut self, old_value: Value, new_value: Value) -> Self {
        self.old_value = Some(old_value);
        self.new_value = Some(new_value);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<&str>) -> Self {
        self.correlation_id = correlation_id.map(str::to_string);
        self
    }

    pub fn task_id(&self) -> TaskId {
        self.task.id
    }
}
