use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(
    /// Identity of a task
    TaskId
);
id_newtype!(
    /// Identity of a team (tenant)
    TeamId
);
id_newtype!(
    /// Identity of a user acting on tasks
    UserId
);

/// Fixed status enumeration shared by every team
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Review,
    Done,
    Archived,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Todo,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Done,
        TaskStatus::Archived,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "TODO",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Review => "REVIEW",
            TaskStatus::Done => "DONE",
            TaskStatus::Archived => "ARCHIVED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| anyhow::anyhow!("Unknown task status: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskPriority::Low => "LOW",
            TaskPriority::Medium => "MEDIUM",
            TaskPriority::High => "HIGH",
            TaskPriority::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

/// The system-of-record task entity.
///
/// `version` is owned by the repository: it is 0 on insert and increments by exactly one on
/// every successful compare-and-swap save. `final_status` is derived from the team's
/// workflow configuration whenever `status` changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub team_id: TeamId,
    pub name: String,
    pub description: Option<String>,
    pub assigned_user: Option<UserId>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_effort: Option<u32>,
    pub labels: BTreeSet<String>,
    pub watchers: BTreeSet<UserId>,
    pub locked: bool,
    pub final_status: bool,
    pub version: u64,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Tombstone set by deletion; deleted tasks are never served
    pub deleted: bool,
}

impl Task {
    /// Users who should hear about changes to this task, excluding `actor`
    pub fn participants_except(&self, actor: UserId) -> BTreeSet<UserId> {
        self.watchers
            .iter()
            .copied()
            .chain(self.assigned_user)
            .filter(|user| *user != actor)
            .collect()
    }
}

/// Input for task creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub team_id: TeamId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    #[serde(default = "default_priority")]
    pub priority: TaskPriority,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub estimated_effort: Option<u32>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub assigned_user: Option<UserId>,
    #[serde(default)]
    pub watchers: BTreeSet<UserId>,
}

fn default_status() -> TaskStatus {
    TaskStatus::Todo
}

fn default_priority() -> TaskPriority {
    TaskPriority::Medium
}

impl NewTask {
    pub fn new(team_id: TeamId, name: impl Into<String>) -> Self {
        Self {
            team_id,
            name: name.into(),
            description: None,
            status: default_status(),
            priority: default_priority(),
            due_date: None,
            estimated_effort: None,
            labels: BTreeSet::new(),
            assigned_user: None,
            watchers: BTreeSet::new(),
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn assigned_to(mut self, user: UserId) -> Self {
        self.assigned_user = Some(user);
        self
    }

    pub fn watched_by<I: IntoIterator<Item = UserId>>(mut self, watchers: I) -> Self {
        self.watchers = watchers.into_iter().collect();
        self
    }
}

/// Assignment change carried by a patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignment {
    Assign(UserId),
    Unassign,
}

/// A partial edit of a task. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    /// Version the caller last read
    pub version: u64,
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub estimated_effort: Option<Option<u32>>,
    pub labels: Option<BTreeSet<String>>,
    pub assignment: Option<Assignment>,
}

impl TaskPatch {
    pub fn at_version(version: u64) -> Self {
        Self {
            version,
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: Option<String>) -> Self {
        self.description = Some(description);
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn due_date(mut self, due_date: Option<DateTime<Utc>>) -> Self {
        self.due_date = Some(due_date);
        self
    }

    pub fn estimated_effort(mut self, effort: Option<u32>) -> Self {
        self.estimated_effort = Some(effort);
        self
    }

    pub fn labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = Some(labels.into_iter().map(Into::into).collect());
        self
    }

    pub fn assign(mut self, user: UserId) -> Self {
        self.assignment = Some(Assignment::Assign(user));
        self
    }

    pub fn unassign(mut self) -> Self {
        self.assignment = Some(Assignment::Unassign);
        self
    }
}

/// Response shape returned by every coordinator operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub id: TaskId,
    pub team_id: TeamId,
    pub name: String,
    pub description: Option<String>,
    pub assigned_user_id: Option<UserId>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_effort: Option<u32>,
    pub labels: BTreeSet<String>,
    pub watcher_ids: BTreeSet<UserId>,
    pub locked: bool,
    pub final_status: bool,
    pub version: u64,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Task> for TaskResponse {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            team_id: task.team_id,
            name: task.name.clone(),
            description: task.description.clone(),
            assigned_user_id: task.assigned_user,
            status: task.status,
            priority: task.priority,
            due_date: task.due_date,
            estimated_effort: task.estimated_effort,
            labels: task.labels.clone(),
            watcher_ids: task.watchers.clone(),
            locked: task.locked,
            final_status: task.final_status,
            version: task.version,
            created_by: task.created_by,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}
