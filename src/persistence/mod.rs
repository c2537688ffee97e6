// Task system-of-record contract

pub mod memory;

pub use memory::InMemoryTaskRepository;

use crate::tasks::{Task, TaskId, TeamId, UserId};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Version mismatch for task {task_id}: expected {expected}, found {found}")]
    VersionConflict {
        task_id: TaskId,
        expected: u64,
        found: u64,
    },

    #[error("Task {0} does not exist")]
    Missing(TaskId),

    #[error("Backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Durable task storage. The repository, not the caller, owns `version`.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Reserve an id for a task about to be created
    async fn next_id(&self) -> anyhow::Result<TaskId>;

    /// Load a task, including tombstoned ones
    async fn load(&self, id: TaskId) -> anyhow::Result<Option<Task>>;

    /// Store a new task at version 0
    async fn insert(&self, task: Task) -> Result<Task, RepositoryError>;

    /// Compare-and-swap write: succeeds only if the stored version equals `task.version`,
    /// and returns the task with its version incremented by one.
    async fn save(&self, task: Task) -> Result<Task, RepositoryError>;

    /// Live (non-deleted) tasks of a team
    async fn list_by_team(&self, team: TeamId) -> anyhow::Result<Vec<Task>>;

    /// Live tasks assigned to a user, across teams
    async fn list_by_assignee(&self, user: UserId) -> anyhow::Result<Vec<Task>>;
}
