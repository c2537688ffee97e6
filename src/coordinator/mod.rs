// Lock-then-mutate-then-emit pipeline for task edits

mod emit;
mod mutation;
pub mod retry;

pub use retry::{retry_on_stale, RetryPolicy};

use crate::access::{Authorizer, Permission, TeamDirectory};
use crate::cache::CacheLayer;
use crate::config::TaskerConfig;
use crate::errors::{MutationError, MutationResult};
use crate::events::{DomainEvent, EventPublisher};
use crate::locking::{lock_owner_token, task_lock_name, LockManager};
use crate::observability::{mutation_metrics, OperationTimer};
use crate::persistence::{RepositoryError, TaskRepository};
use crate::tasks::{Task, TaskId, TaskResponse, TeamId, UserId};
use crate::workflows::WorkflowEngine;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Collaborators the coordinator drives
#[derive(Clone)]
pub struct CoordinatorParts {
    pub repository: Arc<dyn TaskRepository>,
    pub locks: Arc<dyn LockManager>,
    pub workflow: Arc<WorkflowEngine>,
    pub authorizer: Arc<dyn Authorizer>,
    pub directory: Arc<dyn TeamDirectory>,
    pub publisher: Arc<dyn EventPublisher>,
    pub cache: Arc<dyn CacheLayer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub lock_ttl: Duration,
    pub retry: RetryPolicy,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from(&TaskerConfig::default())
    }
}

impl From<&TaskerConfig> for CoordinatorSettings {
    fn from(config: &TaskerConfig) -> Self {
        Self {
            lock_ttl: config.locking.ttl(),
            retry: RetryPolicy::from(&config.coordinator),
        }
    }
}

/// Serializes edits to a task across processes and turns each committed edit into
/// domain events.
///
/// Every mutating operation takes the task's distributed lock first and releases it on
/// every path. The repository's compare-and-swap is the final arbiter of lost updates;
/// event publication and cache eviction happen after commit and never fail the operation.
pub struct MutationCoordinator {
    repository: Arc<dyn TaskRepository>,
    locks: Arc<dyn LockManager>,
    workflow: Arc<WorkflowEngine>,
    authorizer: Arc<dyn Authorizer>,
    directory: Arc<dyn TeamDirectory>,
    publisher: Arc<dyn EventPublisher>,
    cache: Arc<dyn CacheLayer>,
    settings: CoordinatorSettings,
}

impl MutationCoordinator {
    pub fn new(parts: CoordinatorParts, settings: CoordinatorSettings) -> Self {
        Self {
            repository: parts.repository,
            locks: parts.locks,
            workflow: parts.workflow,
            authorizer: parts.authorizer,
            directory: parts.directory,
            publisher: parts.publisher,
            cache: parts.cache,
            settings,
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn workflow(&self) -> &WorkflowEngine {
        &self.workflow
    }

    /// Read a task. Served from cache when possible, so it may trail the latest commit.
    pub async fn get_task(&self, task_id: TaskId, actor: UserId) -> MutationResult<TaskResponse> {
        if let Some(cached) = self.cache.get_task(task_id).await {
            self.authorizer
                .authorize(cached.team_id, actor, Permission::ViewTask)
                .await?;
            debug!(task_id = %task_id, "Task served from cache");
            return Ok(cached);
        }

        let task = self.load_live(task_id).await?;
        self.authorizer
            .authorize(task.team_id, actor, Permission::ViewTask)
            .await?;
        let response = TaskResponse::from(&task);
        self.cache.put_task(response.clone()).await;
        Ok(response)
    }

    /// Live tasks of a team, read through the team-list cache
    pub async fn list_team_tasks(
        &self,
        team: TeamId,
        actor: UserId,
    ) -> MutationResult<Arc<Vec<TaskResponse>>> {
        self.authorizer
            .authorize(team, actor, Permission::ViewTask)
            .await?;
        if let Some(cached) = self.cache.get_team_tasks(team).await {
            return Ok(cached);
        }

        let tasks: Vec<TaskResponse> = self
            .repository
            .list_by_team(team)
            .await
            .map_err(MutationError::Storage)?
            .iter()
            .map(TaskResponse::from)
            .collect();
        self.cache.put_team_tasks(team, tasks.clone()).await;
        Ok(Arc::new(tasks))
    }

    /// Tasks assigned to the actor across all teams
    pub async fn list_assigned_tasks(&self, actor: UserId) -> MutationResult<Arc<Vec<TaskResponse>>> {
        if let Some(cached) = self.cache.get_user_tasks(actor).await {
            return Ok(cached);
        }

        let tasks: Vec<TaskResponse> = self
            .repository
            .list_by_assignee(actor)
            .await
            .map_err(MutationError::Storage)?
            .iter()
            .map(TaskResponse::from)
            .collect();
        self.cache.put_user_tasks(actor, tasks.clone()).await;
        Ok(Arc::new(tasks))
    }

    /// Run `operation` while holding the task's lock. The lock is released whether the
    /// operation succeeded or not; a failed release is logged and left to the TTL.
    async fn with_task_lock<T, F, Fut>(
        &self,
        task_id: TaskId,
        actor: UserId,
        operation: F,
    ) -> MutationResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MutationResult<T>>,
    {
        let lock_name = task_lock_name(task_id);
        let owner = lock_owner_token(actor);

        let acquired = self
            .locks
            .try_acquire(&lock_name, &owner, self.settings.lock_ttl)
            .await
            .map_err(MutationError::Storage)?;
        if !acquired {
            debug!(task_id = %task_id, actor = %actor, "Task lock held by another editor");
            return Err(MutationError::ConcurrentEditConflict { task_id });
        }

        let result = operation().await;

        if let Err(e) = self.locks.release(&lock_name, &owner).await {
            warn!(
                task_id = %task_id,
                lock = %lock_name,
                error = %e,
                "Failed to release task lock, it will expire after its TTL"
            );
        }
        result
    }

    /// Time an operation and count its outcome
    async fn observe<T>(
        &self,
        operation: &'static str,
        future: impl Future<Output = MutationResult<T>>,
    ) -> MutationResult<T> {
        let timer = OperationTimer::new(operation);
        let result = future.await;
        match &result {
            Ok(_) => {
                mutation_metrics().record_commit();
                timer.finish("committed");
            }
            Err(e) => {
                mutation_metrics().record_failure(e);
                debug!(operation = operation, error = %e, "Task mutation rejected");
                timer.finish(e.kind());
            }
        }
        result
    }

    /// Load a task that has not been deleted
    async fn load_live(&self, task_id: TaskId) -> MutationResult<Task> {
        match self
            .repository
            .load(task_id)
            .await
            .map_err(MutationError::Storage)?
        {
            Some(task) if !task.deleted => Ok(task),
            _ => Err(MutationError::NotFound(task_id)),
        }
    }

    async fn persist(&self, task: Task) -> MutationResult<Task> {
        self.repository.save(task).await.map_err(repository_error)
    }

    async fn ensure_member(&self, team: TeamId, user: UserId) -> MutationResult<()> {
        let member = self
            .directory
            .is_member(team, user)
            .await
            .map_err(MutationError::Storage)?;
        if member {
            Ok(())
        } else {
            Err(MutationError::NotTeamMember { team, user })
        }
    }

    /// Every label must already be defined for the team
    async fn validate_labels(&self, team: TeamId, labels: &BTreeSet<String>) -> MutationResult<()> {
        if labels.is_empty() {
            return Ok(());
        }
        let known = self
            .directory
            .team_labels(team)
            .await
            .map_err(MutationError::Storage)?;
        let unknown: Vec<String> = labels.difference(&known).cloned().collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(MutationError::InvalidLabel { labels: unknown })
        }
    }

    /// Hand events to the fan-out. The mutation is already committed, so failures are
    /// only logged.
    fn publish_all(&self, events: Vec<DomainEvent>) {
        for event in events {
            let kind = event.kind;
            let task_id = event.task_id();
            if let Err(e) = self.publisher.publish(event) {
                mutation_metrics().record_publish_failure();
                warn!(task_id = %task_id, event = %kind, error = %e, "Failed to publish domain event");
            }
        }
    }

    /// Drop cache entries a commit may have made stale
    async fn evict_cached(&self, before: Option<&Task>, after: &Task) {
        let users: Vec<UserId> = before
            .and_then(|task| task.assigned_user)
            .into_iter()
            .chain(after.assigned_user)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if let Err(e) = self.cache.evict(after.id, after.team_id, &users).await {
            warn!(task_id = %after.id, error = %e, "Cache eviction failed, entries will expire by TTL");
        }
    }
}

fn repository_error(error: RepositoryError) -> MutationError {
    match error {
        RepositoryError::VersionConflict {
            expected, found, ..
        } => MutationError::StaleWriteConflict {
            current: found,
            supplied: expected,
        },
        RepositoryError::Missing(task_id) => MutationError::NotFound(task_id),
        RepositoryError::Backend(e) => MutationError::Storage(e),
    }
}
