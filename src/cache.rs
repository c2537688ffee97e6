use crate::config::CacheConfig;
use crate::tasks::{TaskId, TaskResponse, TeamId, UserId};
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Read cache in front of the repository. Entries may be stale up to their TTL; writers
/// evict after commit but never depend on the eviction succeeding.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    async fn get_task(&self, task_id: TaskId) -> Option<TaskResponse>;

    async fn put_task(&self, task: TaskResponse);

    async fn get_team_tasks(&self, team: TeamId) -> Option<Arc<Vec<TaskResponse>>>;

    async fn put_team_tasks(&self, team: TeamId, tasks: Vec<TaskResponse>);

    async fn get_user_tasks(&self, user: UserId) -> Option<Arc<Vec<TaskResponse>>>;

    async fn put_user_tasks(&self, user: UserId, tasks: Vec<TaskResponse>);

    /// Drop the task entry plus the team and user lists it appears in
    async fn evict(&self, task_id: TaskId, team: TeamId, users: &[UserId]) -> anyhow::Result<()>;
}

/// moka-backed task cache with separate TTLs for single tasks and lists
#[derive(Clone)]
pub struct TaskCache {
    tasks: Cache<TaskId, TaskResponse>,
    team_tasks: Cache<TeamId, Arc<Vec<TaskResponse>>>,
    user_tasks: Cache<UserId, Arc<Vec<TaskResponse>>>,
}

impl TaskCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            tasks: Cache::builder()
                .max_capacity(config.max_capacity)
                .time_to_live(Duration::from_secs(config.task_ttl_seconds))
                .build(),
            team_tasks: Cache::builder()
                .max_capacity(config.max_capacity)
                .time_to_live(Duration::from_secs(config.team_tasks_ttl_seconds))
                .build(),
            user_tasks: Cache::builder()
                .max_capacity(config.max_capacity)
                .time_to_live(Duration::from_secs(config.user_tasks_ttl_seconds))
                .build(),
        }
    }
}

impl Default for TaskCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

#[async_trait]
impl CacheLayer for TaskCache {
    async fn get_task(&self, task_id: TaskId) -> Option<TaskResponse> {
        let cached = self.tasks.get(&task_id).await;
        if cached.is_some() {
            debug!(task_id = %task_id, "Task cache hit");
        }
        cached
    }

    async fn put_task(&self, task: TaskResponse) {
        self.tasks.insert(task.id, task).await;
    }

    async fn get_team_tasks(&self, team: TeamId) -> Option<Arc<Vec<TaskResponse>>> {
        self.team_tasks.get(&team).await
    }

    async fn put_team_tasks(&self, team: TeamId, tasks: Vec<TaskResponse>) {
        self.team_tasks.insert(team, Arc::new(tasks)).await;
    }

    async fn get_user_tasks(&self, user: UserId) -> Option<Arc<Vec<TaskResponse>>> {
        self.user_tasks.get(&user).await
    }

    async fn put_user_tasks(&self, user: UserId, tasks: Vec<TaskResponse>) {
        self.user_tasks.insert(user, Arc::new(tasks)).await;
    }

    async fn evict(&self, task_id: TaskId, team: TeamId, users: &[UserId]) -> anyhow::Result<()> {
        self.tasks.invalidate(&task_id).await;
        self.team_tasks.invalidate(&team).await;
        for user in users {
            self.user_tasks.invalidate(user).await;
        }
        debug!(task_id = %task_id, team = %team, users = users.len(), "Evicted task cache entries");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{TaskPriority, TaskStatus};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn response(id: u64) -> TaskResponse {
        let now = Utc::now();
        TaskResponse {
            id: TaskId(id),
            team_id: TeamId(1),
            name: "cached".to_string(),
            description: None,
            assigned_user_id: Some(UserId(2)),
            status: TaskStatus::Todo,
            priority: TaskPriority::Low,
            due_date: None,
            estimated_effort: None,
            labels: BTreeSet::new(),
            watcher_ids: BTreeSet::new(),
            locked: false,
            final_status: false,
            version: 0,
            created_by: UserId(1),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_evict_drops_task_and_lists() {
        let cache = TaskCache::default();
        cache.put_task(response(1)).await;
        cache.put_team_tasks(TeamId(1), vec![response(1)]).await;
        cache.put_user_tasks(UserId(2), vec![response(1)]).await;
        cache.put_user_tasks(UserId(3), vec![]).await;

        cache.evict(TaskId(1), TeamId(1), &[UserId(2)]).await.unwrap();

        assert!(cache.get_task(TaskId(1)).await.is_none());
        assert!(cache.get_team_tasks(TeamId(1)).await.is_none());
        assert!(cache.get_user_tasks(UserId(2)).await.is_none());
        assert!(cache.get_user_tasks(UserId(3)).await.is_some());
    }
}
