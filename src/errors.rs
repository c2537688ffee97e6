use crate::access::Permission;
use crate::tasks::{TaskId, TaskStatus, TeamId, UserId};
use thiserror::Error;

/// Failures surfaced by task mutations.
///
/// Every variant reaches the caller verbatim. Only `StaleWriteConflict` is worth retrying
/// automatically, and only after re-reading the task.
#[derive(Debug, Error)]
pub enum MutationError {
    #[error("Task {0} not found")]
    NotFound(TaskId),

    #[error("User {actor} lacks {permission} permission on team {team}")]
    Forbidden {
        team: TeamId,
        actor: UserId,
        permission: Permission,
    },

    #[error("Task {task_id} is currently being edited by another user")]
    ConcurrentEditConflict { task_id: TaskId },

    #[error("Task has been modified by another user (current version {current}, supplied version {supplied}). Please refresh and try again.")]
    StaleWriteConflict { current: u64, supplied: u64 },

    #[error("Cannot transition from final status {from} to {to}. Status reversion required.")]
    WorkflowViolation { from: TaskStatus, to: TaskStatus },

    #[error("Invalid labels: {}", labels.join(", "))]
    InvalidLabel { labels: Vec<String> },

    #[error("Task {task_id} is locked")]
    TaskLocked { task_id: TaskId },

    #[error("User {user} is not a member of team {team}")]
    NotTeamMember { team: TeamId, user: UserId },

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl MutationError {
    /// Lost-update races are transient; everything else needs a changed request
    pub fn is_retryable(&self) -> bool {
        matches!(self, MutationError::StaleWriteConflict { .. })
    }

    /// Short machine-readable kind for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            MutationError::NotFound(_) => "not_found",
            MutationError::Forbidden { .. } => "forbidden",
            MutationError::ConcurrentEditConflict { .. } => "concurrent_edit_conflict",
            MutationError::StaleWriteConflict { .. } => "stale_write_conflict",
            MutationError::WorkflowViolation { .. } => "workflow_violation",
            MutationError::InvalidLabel { .. } => "invalid_label",
            MutationError::TaskLocked { .. } => "task_locked",
            MutationError::NotTeamMember { .. } => "not_team_member",
            MutationError::Storage(_) => "storage",
        }
    }
}

pub type MutationResult<T> = Result<T, MutationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_stale_writes_are_retryable() {
        assert!(MutationError::StaleWriteConflict { current: 4, supplied: 3 }.is_retryable());
        assert!(!MutationError::ConcurrentEditConflict { task_id: TaskId(1) }.is_retryable());
        assert!(!MutationError::WorkflowViolation {
            from: TaskStatus::Done,
            to: TaskStatus::Archived
        }
        .is_retryable());
        assert!(!MutationError::Forbidden {
            team: TeamId(1),
            actor: UserId(2),
            permission: Permission::EditTask
        }
        .is_retryable());
    }

    #[test]
    fn test_messages_name_the_offending_values() {
        let err = MutationError::InvalidLabel {
            labels: vec!["nope".to_string(), "missing".to_string()],
        };
        assert_eq!(err.to_string(), "Invalid labels: nope, missing");

        let err = MutationError::WorkflowViolation {
            from: TaskStatus::Done,
            to: TaskStatus::Archived,
        };
        assert!(err.to_string().contains("final status DONE"));
    }
}
