use super::event::{DomainEvent, EventKind};
use super::fanout::EventSubscriber;
use crate::config::NotificationConfig;
use crate::tasks::{Task, TaskId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

const TASK_UPDATES_DESTINATION: &str = "/queue/task-updates";

/// Real-time payload pushed to online users
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskNotification {
    pub task_id: TaskId,
    pub task_name: String,
    pub action: String,
    pub actor: UserId,
    pub field: Option<String>,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl From<&DomainEvent> for TaskNotification {
    fn from(event: &DomainEvent) -> Self {
        let action = match event.kind {
            EventKind::StatusReverted => "TASK_STATUS_REVERTED",
            EventKind::TaskStatusChanged => "STATUS_CHANGED",
            other => other.as_str(),
        };
        Self {
            task_id: event.task_id(),
            task_name: event.task.name.clone(),
            action: action.to_string(),
            actor: event.actor,
            field: event.field.map(|field| field.as_str().to_string()),
            old_value: event.old_value.clone(),
            new_value: event.new_value.clone(),
            timestamp: event.occurred_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmailKind {
    Assignment,
    Unassignment,
    TaskDeleted,
}

/// Session delivery for users who are currently connected
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn is_online(&self, user: UserId) -> bool;

    async fn send_to_user(
        &self,
        user: UserId,
        destination: &str,
        notification: &TaskNotification,
    ) -> anyhow::Result<()>;
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, recipient: UserId, kind: EmailKind, task: &Task) -> anyhow::Result<()>;
}

/// Pushes task changes to participants and mails assignment and deletion notices.
///
/// Recipients are the task's watchers and assignee, never the actor. E-mail goes through
/// a rate limiter so a burst of edits cannot flood the mail relay.
pub struct NotificationSubscriber {
    dispatcher: Arc<dyn NotificationDispatcher>,
    email: Option<Arc<dyn EmailSender>>,
    email_limiter: DefaultDirectRateLimiter,
}

impl NotificationSubscriber {
    pub fn new(
        dispatcher: Arc<dyn NotificationDispatcher>,
        email: Option<Arc<dyn EmailSender>>,
        config: &NotificationConfig,
    ) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(config.emails_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.email_burst).unwrap_or(NonZeroU32::MIN));

        Self {
            dispatcher,
            email: if config.email_enabled { email } else { None },
            email_limiter: RateLimiter::direct(quota),
        }
    }

    async fn push(
        &self,
        recipients: &BTreeSet<UserId>,
        notification: &TaskNotification,
        failures: &mut Vec<String>,
    ) {
        for user in recipients {
            if !self.dispatcher.is_online(*user).await {
                continue;
            }
            if let Err(e) = self
                .dispatcher
                .send_to_user(*user, TASK_UPDATES_DESTINATION, notification)
                .await
            {
                failures.push(format!("push to user {}: {}", user, e));
            }
        }
    }

    async fn mail(&self, recipient: UserId, kind: EmailKind, task: &Task, failures: &mut Vec<String>) {
        let Some(email) = &self.email else {
            return;
        };
        self.email_limiter.until_ready().await;
        if let Err(e) = email.send(recipient, kind, task).await {
            failures.push(format!("email {:?} to user {}: {}", kind, recipient, e));
        }
    }
}

fn user_from_value(value: Option<&Value>) -> Option<UserId> {
    value.and_then(Value::as_u64).map(UserId)
}

#[async_trait]
impl EventSubscriber for NotificationSubscriber {
    fn name(&self) -> &str {
        "notification"
    }

    fn accepts(&self, kind: EventKind) -> bool {
        !matches!(kind, EventKind::LabelAdded | EventKind::LabelRemoved)
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        let task = event.task.as_ref();
        let notification = TaskNotification::from(event);
        let mut recipients = task.participants_except(event.actor);
        let mut failures = Vec::new();

        match event.kind {
            EventKind::TaskCreated => {
                if let Some(assignee) = task.assigned_user {
                    self.mail(assignee, EmailKind::Assignment, task, &mut failures).await;
                }
            }
            EventKind::TaskAssigned => {
                let previous = user_from_value(event.old_value.as_ref());
                let current = user_from_value(event.new_value.as_ref());
                if let Some(previous) = previous.filter(|user| *user != event.actor) {
                    recipients.insert(previous);
                }
                if let Some(previous) = previous {
                    self.mail(previous, EmailKind::Unassignment, task, &mut failures).await;
                }
                if let Some(current) = current {
                    self.mail(current, EmailKind::Assignment, task, &mut failures).await;
                }
            }
            EventKind::TaskDeleted => {
                for user in &recipients {
                    self.mail(*user, EmailKind::TaskDeleted, task, &mut failures).await;
                }
            }
            _ => {}
        }

        self.push(&recipients, &notification, &mut failures).await;
        debug!(
            task_id = %task.id,
            kind = %event.kind,
            recipients = recipients.len(),
            "Notifications dispatched"
        );

        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "{} notification deliveries failed: {}",
                failures.len(),
                failures.join("; ")
            ))
        }
    }
}

/// Tracks connected users and keeps every pushed notification
#[derive(Debug, Default)]
pub struct InMemoryNotificationDispatcher {
    online: RwLock<HashSet<UserId>>,
    delivered: Mutex<Vec<(UserId, String, TaskNotification)>>,
}

impl InMemoryNotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_session(&self, user: UserId) {
        self.online.write().await.insert(user);
    }

    pub async fn remove_session(&self, user: UserId) {
        self.online.write().await.remove(&user);
    }

    pub async fn delivered(&self) -> Vec<(UserId, String, TaskNotification)> {
        self.delivered.lock().await.clone()
    }
}

#[async_trait]
impl NotificationDispatcher for InMemoryNotificationDispatcher {
    async fn is_online(&self, user: UserId) -> bool {
        self.online.read().await.contains(&user)
    }

    async fn send_to_user(
        &self,
        user: UserId,
        destination: &str,
        notification: &TaskNotification,
    ) -> anyhow::Result<()> {
        self.delivered
            .lock()
            .await
            .push((user, destination.to_string(), notification.clone()));
        Ok(())
    }
}

/// Keeps sent e-mails instead of delivering them
#[derive(Debug, Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<(UserId, EmailKind, TaskId)>>,
}

impl RecordingEmailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<(UserId, EmailKind, TaskId)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, recipient: UserId, kind: EmailKind, task: &Task) -> anyhow::Result<()> {
        self.sent.lock().await.push((recipient, kind, task.id));
        Ok(())
    }
}
