use super::{RepositoryError, TaskRepository};
use crate::tasks::{Task, TaskId, TeamId, UserId};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Process-local repository with the same compare-and-swap semantics a database row
/// version column gives.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskRepository {
    tasks: Arc<Mutex<HashMap<TaskId, Task>>>,
    sequence: Arc<AtomicU64>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn next_id(&self) -> anyhow::Result<TaskId> {
        Ok(TaskId(self.sequence.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn load(&self, id: TaskId) -> anyhow::Result<Option<Task>> {
        Ok(self.tasks.lock().await.get(&id).cloned())
    }

    async fn insert(&self, mut task: Task) -> Result<Task, RepositoryError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&task.id) {
            return Err(RepositoryError::Backend(anyhow::anyhow!(
                "Task {} already exists",
                task.id
            )));
        }
        task.version = 0;
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn save(&self, mut task: Task) -> Result<Task, RepositoryError> {
        let mut tasks = self.tasks.lock().await;
        let stored = tasks
            .get(&task.id)
            .ok_or(RepositoryError::Missing(task.id))?;

        if stored.version != task.version {
            return Err(RepositoryError::VersionConflict {
                task_id: task.id,
                expected: task.version,
                found: stored.version,
            });
        }

        task.version += 1;
        task.updated_at = Utc::now();
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn list_by_team(&self, team: TeamId) -> anyhow::Result<Vec<Task>> {
        let tasks = self.tasks.lock().await;
        let mut listed: Vec<Task> = tasks
            .values()
            .filter(|task| task.team_id == team && !task.deleted)
            .cloned()
            .collect();
        listed.sort_by_key(|task| task.id);
        Ok(listed)
    }

    async fn list_by_assignee(&self, user: UserId) -> anyhow::Result<Vec<Task>> {
        let tasks = self.tasks.lock().await;
        let mut listed: Vec<Task> = tasks
            .values()
            .filter(|task| task.assigned_user == Some(user) && !task.deleted)
            .cloned()
            .collect();
        listed.sort_by_key(|task| task.id);
        Ok(listed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{TaskPriority, TaskStatus};
    use std::collections::BTreeSet;

    fn new_task(id: TaskId, team: TeamId) -> Task {
        let now = Utc::now();
        Task {
            id,
            team_id: team,
            name: format!("task {}", id),
            description: None,
            assigned_user: None,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            due_date: None,
            estimated_effort: None,
            labels: BTreeSet::new(),
            watchers: BTreeSet::new(),
            locked: false,
            final_status: false,
            version: 0,
            created_by: UserId(1),
            created_at: now,
            updated_at: now,
            deleted: false,
        }
    }

    #[tokio::test]
    async fn test_save_increments_version() {
        let repo = InMemoryTaskRepository::new();
        let id = repo.next_id().await.unwrap();
        let task = repo.insert(new_task(id, TeamId(1))).await.unwrap();
        assert_eq!(task.version, 0);

        let saved = repo.save(task).await.unwrap();
        assert_eq!(saved.version, 1);
        assert_eq!(repo.load(id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_save_with_outdated_version_is_rejected() {
        let repo = InMemoryTaskRepository::new();
        let id = repo.next_id().await.unwrap();
        let original = repo.insert(new_task(id, TeamId(1))).await.unwrap();
        repo.save(original.clone()).await.unwrap();

        let err = repo.save(original).await.unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::VersionConflict { expected: 0, found: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_listing_skips_other_teams_and_tombstones() {
        let repo = InMemoryTaskRepository::new();
        for team in [TeamId(1), TeamId(1), TeamId(2)] {
            let id = repo.next_id().await.unwrap();
            repo.insert(new_task(id, team)).await.unwrap();
        }
        let mut first = repo.load(TaskId(1)).await.unwrap().unwrap();
        first.deleted = true;
        repo.save(first).await.unwrap();

        let listed = repo.list_by_team(TeamId(1)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, TaskId(2));
    }
}
