use super::emit::{creation_events, deletion_event, mutation_events, StatusChange};
use super::retry::retry_on_stale;
use super::MutationCoordinator;
use crate::access::Permission;
use crate::errors::{MutationError, MutationResult};
use crate::persistence::RepositoryError;
use crate::tasks::{Assignment, NewTask, Task, TaskId, TaskPatch, TaskResponse, TaskStatus, UserId};
use crate::telemetry::{create_mutation_span, generate_correlation_id};
use crate::versioning::check_version;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, Instrument};

const DEFAULT_REVERSION_REASON: &str = "Status reversion by authorized user";

impl MutationCoordinator {
    /// Create a task. The id is reserved first so the new task's lock can be taken before
    /// anything is written.
    pub async fn create_task(&self, actor: UserId, new_task: NewTask) -> MutationResult<TaskResponse> {
        let correlation_id = generate_correlation_id();
        let span = create_mutation_span("create_task", None, Some(actor.0), Some(&correlation_id));

        self.observe("create_task", async {
            let task_id = self
                .repository
                .next_id()
                .await
                .map_err(MutationError::Storage)?;
            tracing::Span::current().record("task.id", task_id.0);
            self.with_task_lock(task_id, actor, || {
                self.apply_create(task_id, actor, new_task, &correlation_id)
            })
            .await
        })
        .instrument(span)
        .await
    }

    async fn apply_create(
        &self,
        task_id: TaskId,
        actor: UserId,
        new_task: NewTask,
        correlation_id: &str,
    ) -> MutationResult<TaskResponse> {
        let team = new_task.team_id;
        self.authorizer
            .authorize(team, actor, Permission::CreateTask)
            .await?;

        if let Some(assignee) = new_task.assigned_user {
            self.ensure_member(team, assignee).await?;
        }
        for watcher in &new_task.watchers {
            self.ensure_member(team, *watcher).await?;
        }
        self.validate_labels(team, &new_task.labels).await?;
        let final_status = self.workflow.is_final_status(team, new_task.status).await?;

        let now = Utc::now();
        let task = Task {
            id: task_id,
            team_id: team,
            name: new_task.name,
            description: new_task.description,
            assigned_user: new_task.assigned_user,
            status: new_task.status,
            priority: new_task.priority,
            due_date: new_task.due_date,
            estimated_effort: new_task.estimated_effort,
            labels: new_task.labels,
            watchers: new_task.watchers,
            locked: false,
            final_status,
            version: 0,
            created_by: actor,
            created_at: now,
            updated_at: now,
            deleted: false,
        };

        let created = Arc::new(
            self.repository
                .insert(task)
                .await
                .map_err(|e| match e {
                    RepositoryError::Backend(e) => MutationError::Storage(e),
                    other => MutationError::Storage(other.into()),
                })?,
        );
        info!(task_id = %created.id, team = %team, actor = %actor, "Task created");

        self.publish_all(creation_events(&created, actor, correlation_id));
        self.evict_cached(None, &created).await;
        Ok(TaskResponse::from(created.as_ref()))
    }

    /// Apply a partial edit under the task lock.
    ///
    /// The supplied version must match the stored one. A status change is checked against
    /// the team's final-status set and recomputes `final_status`; the assignee must belong
    /// to the team and every label must be known to it.
    pub async fn update_task(
        &self,
        task_id: TaskId,
        actor: UserId,
        patch: TaskPatch,
    ) -> MutationResult<TaskResponse> {
        let correlation_id = generate_correlation_id();
        let span = create_mutation_span(
            "update_task",
            Some(task_id.0),
            Some(actor.0),
            Some(&correlation_id),
        );

        self.observe(
            "update_task",
            self.with_task_lock(task_id, actor, || {
                self.apply_update(task_id, actor, patch, &correlation_id)
            }),
        )
        .instrument(span)
        .await
    }

    async fn apply_update(
        &self,
        task_id: TaskId,
        actor: UserId,
        patch: TaskPatch,
        correlation_id: &str,
    ) -> MutationResult<TaskResponse> {
        let before = self.load_live(task_id).await?;
        check_version(before.version, patch.version)?;
        self.authorizer
            .authorize(before.team_id, actor, Permission::EditTask)
            .await?;
        if before.locked {
            return Err(MutationError::TaskLocked { task_id });
        }

        let team = before.team_id;
        let mut task = before.clone();

        if let Some(status) = patch.status.filter(|status| *status != before.status) {
            self.workflow
                .validate_transition(team, before.status, status)
                .await?;
            task.status = status;
            task.final_status = self.workflow.is_final_status(team, status).await?;
        }

        match patch.assignment {
            Some(Assignment::Assign(user)) => {
                self.ensure_member(team, user).await?;
                task.assigned_user = Some(user);
            }
            Some(Assignment::Unassign) => task.assigned_user = None,
            None => {}
        }
        if let Some(labels) = patch.labels {
            self.validate_labels(team, &labels).await?;
            task.labels = labels;
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(due_date) = patch.due_date {
            task.due_date = due_date;
        }
        if let Some(effort) = patch.estimated_effort {
            task.estimated_effort = effort;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(name) = patch.name {
            task.name = name;
        }

        self.commit(before, task, actor, StatusChange::Transition, None, correlation_id)
            .await
    }

    /// Update with automatic retry on lost-update races.
    ///
    /// Before every attempt the latest task is re-read and `rebase` builds a fresh patch
    /// from it, so a retry never replays a patch computed against an outdated version.
    pub async fn update_task_with_retry<F>(
        &self,
        task_id: TaskId,
        actor: UserId,
        rebase: F,
    ) -> MutationResult<TaskResponse>
    where
        F: Fn(&TaskResponse) -> TaskPatch,
    {
        retry_on_stale(&self.settings.retry, "update_task", || async {
            let latest = self.load_live(task_id).await?;
            let patch = rebase(&TaskResponse::from(&latest));
            self.update_task(task_id, actor, patch).await
        })
        .await
    }

    /// Soft delete. The tombstone goes through the same versioned save as any edit.
    pub async fn delete_task(
        &self,
        task_id: TaskId,
        actor: UserId,
        version: u64,
    ) -> MutationResult<TaskResponse> {
        let correlation_id = generate_correlation_id();
        let span = create_mutation_span(
            "delete_task",
            Some(task_id.0),
            Some(actor.0),
            Some(&correlation_id),
        );

        self.observe(
            "delete_task",
            self.with_task_lock(task_id, actor, || async {
                let before = self.load_live(task_id).await?;
                check_version(before.version, version)?;
                self.authorizer
                    .authorize(before.team_id, actor, Permission::DeleteTask)
                    .await?;
                if before.locked {
                    return Err(MutationError::TaskLocked { task_id });
                }

                let mut task = before.clone();
                task.deleted = true;
                let deleted = Arc::new(self.persist(task).await?);
                info!(task_id = %task_id, actor = %actor, "Task deleted");

                self.publish_all(vec![deletion_event(&deleted, actor, &correlation_id)]);
                self.evict_cached(Some(&before), &deleted).await;
                Ok(TaskResponse::from(deleted.as_ref()))
            }),
        )
        .instrument(span)
        .await
    }

    pub async fn lock_task(
        &self,
        task_id: TaskId,
        actor: UserId,
        version: u64,
    ) -> MutationResult<TaskResponse> {
        self.set_locked(task_id, actor, version, true).await
    }

    pub async fn unlock_task(
        &self,
        task_id: TaskId,
        actor: UserId,
        version: u64,
    ) -> MutationResult<TaskResponse> {
        self.set_locked(task_id, actor, version, false).await
    }

    async fn set_locked(
        &self,
        task_id: TaskId,
        actor: UserId,
        version: u64,
        locked: bool,
    ) -> MutationResult<TaskResponse> {
        let operation = if locked { "lock_task" } else { "unlock_task" };
        let correlation_id = generate_correlation_id();
        let span = create_mutation_span(operation, Some(task_id.0), Some(actor.0), Some(&correlation_id));

        self.observe(
            operation,
            self.with_task_lock(task_id, actor, || async {
                let before = self.load_live(task_id).await?;
                check_version(before.version, version)?;
                self.authorizer
                    .authorize(before.team_id, actor, Permission::LockTask)
                    .await?;
                if before.locked == locked {
                    debug!(task_id = %task_id, locked, "Lock state unchanged, nothing to commit");
                    return Ok(TaskResponse::from(&before));
                }

                let mut task = before.clone();
                task.locked = locked;
                self.commit(before, task, actor, StatusChange::Transition, None, &correlation_id)
                    .await
            }),
        )
        .instrument(span)
        .await
    }

    /// Replace the watcher set
    pub async fn update_watchers(
        &self,
        task_id: TaskId,
        actor: UserId,
        version: u64,
        watchers: BTreeSet<UserId>,
    ) -> MutationResult<TaskResponse> {
        let correlation_id = generate_correlation_id();
        let span = create_mutation_span(
            "update_watchers",
            Some(task_id.0),
            Some(actor.0),
            Some(&correlation_id),
        );

        self.observe(
            "update_watchers",
            self.with_task_lock(task_id, actor, || async {
                let before = self.load_live(task_id).await?;
                check_version(before.version, version)?;
                self.authorizer
                    .authorize(before.team_id, actor, Permission::ManageWatchers)
                    .await?;
                if before.locked {
                    return Err(MutationError::TaskLocked { task_id });
                }
                for watcher in watchers.difference(&before.watchers) {
                    self.ensure_member(before.team_id, *watcher).await?;
                }

                let mut task = before.clone();
                task.watchers = watchers;
                self.commit(before, task, actor, StatusChange::Transition, None, &correlation_id)
                    .await
            }),
        )
        .instrument(span)
        .await
    }

    /// Move a task to `new_status` regardless of the final-status gate. Requires edit
    /// permission plus the team's reversion policy.
    pub async fn revert_status(
        &self,
        task_id: TaskId,
        actor: UserId,
        version: u64,
        new_status: TaskStatus,
        reason: Option<String>,
    ) -> MutationResult<TaskResponse> {
        let correlation_id = generate_correlation_id();
        let span = create_mutation_span(
            "revert_status",
            Some(task_id.0),
            Some(actor.0),
            Some(&correlation_id),
        );

        self.observe(
            "revert_status",
            self.with_task_lock(task_id, actor, || async {
                let before = self.load_live(task_id).await?;
                check_version(before.version, version)?;
                let team = before.team_id;
                self.authorizer
                    .authorize(team, actor, Permission::EditTask)
                    .await?;
                self.workflow.authorize_reversion(team, actor).await?;
                if before.locked {
                    return Err(MutationError::TaskLocked { task_id });
                }

                let mut task = before.clone();
                task.status = new_status;
                task.final_status = self.workflow.is_final_status(team, new_status).await?;

                let reason = reason.unwrap_or_else(|| DEFAULT_REVERSION_REASON.to_string());
                info!(
                    task_id = %task_id,
                    actor = %actor,
                    from = %before.status,
                    to = %new_status,
                    reason = %reason,
                    "Reverting task status"
                );
                self.commit(
                    before,
                    task,
                    actor,
                    StatusChange::Reversion,
                    Some(reason),
                    &correlation_id,
                )
                .await
            }),
        )
        .instrument(span)
        .await
    }

    /// Persist `after`, then publish the diff and evict stale cache entries
    async fn commit(
        &self,
        before: Task,
        after: Task,
        actor: UserId,
        status_change: StatusChange,
        reason: Option<String>,
        correlation_id: &str,
    ) -> MutationResult<TaskResponse> {
        let saved = Arc::new(self.persist(after).await?);
        info!(
            task_id = %saved.id,
            actor = %actor,
            version = saved.version,
            "Task mutation committed"
        );

        let mut events = mutation_events(&before, &saved, actor, status_change, correlation_id);
        if let Some(reason) = reason {
            events = events
                .into_iter()
                .map(|event| event.with_metadata("reason", reason.clone()))
                .collect();
        }
        self.publish_all(events);
        self.evict_cached(Some(&before), &saved).await;
        Ok(TaskResponse::from(saved.as_ref()))
    }
}
