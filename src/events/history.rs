use super::event::{DomainEvent, EventKind};
use super::fanout::EventSubscriber;
use crate::tasks::{TaskId, TeamId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Immutable audit record for one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub task_id: TaskId,
    pub user_id: UserId,
    pub action: String,
    pub field: Option<String>,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub additional_info: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl From<&DomainEvent> for HistoryEntry {
    fn from(event: &DomainEvent) -> Self {
        Self {
            task_id: event.task_id(),
            user_id: event.actor,
            action: event.kind.as_str().to_string(),
            field: event.field.map(|field| field.as_str().to_string()),
            old_value: event.old_value.clone(),
            new_value: event.new_value.clone(),
            additional_info: event.metadata.clone(),
            timestamp: event.occurred_at,
        }
    }
}

/// Administrative record that belongs to a team rather than a task, such as a workflow change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamAuditEntry {
    pub team_id: TeamId,
    pub user_id: UserId,
    pub action: String,
    pub additional_info: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl TeamAuditEntry {
    pub fn new(team_id: TeamId, user_id: UserId, action: impl Into<String>) -> Self {
        Self {
            team_id,
            user_id,
            action: action.into(),
            additional_info: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_info(mut self, key: &str, value: Value) -> Self {
        self.additional_info.insert(key.to_string(), value);
        self
    }
}

/// Summary of a task's audit trail
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummary {
    pub created_at: Option<DateTime<Utc>>,
    pub created_by: Option<UserId>,
    pub total_changes: usize,
    pub last_modified_at: Option<DateTime<Utc>>,
    pub last_modified_by: Option<UserId>,
    pub status_changes: usize,
    pub assignee_changes: usize,
}

/// Append-only history storage
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, entry: HistoryEntry) -> anyhow::Result<()>;

    /// Entries of a task, oldest first
    async fn entries_for(&self, task_id: TaskId) -> anyhow::Result<Vec<HistoryEntry>>;

    async fn append_team_entry(&self, entry: TeamAuditEntry) -> anyhow::Result<()>;

    /// Team-level entries, oldest first
    async fn team_entries(&self, team: TeamId) -> anyhow::Result<Vec<TeamAuditEntry>>;

    async fn audit_summary(&self, task_id: TaskId) -> anyhow::Result<AuditSummary> {
        let history = self.entries_for(task_id).await?;
        let count = |action: EventKind| {
            history
                .iter()
                .filter(|entry| entry.action == action.as_str())
                .count()
        };

        Ok(AuditSummary {
            created_at: history.first().map(|entry| entry.timestamp),
            created_by: history.first().map(|entry| entry.user_id),
            total_changes: history.len(),
            last_modified_at: history.last().map(|entry| entry.timestamp),
            last_modified_by: history.last().map(|entry| entry.user_id),
            status_changes: count(EventKind::TaskStatusChanged) + count(EventKind::StatusReverted),
            assignee_changes: count(EventKind::TaskAssigned),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryHistoryStore {
    entries: Arc<RwLock<HashMap<TaskId, Vec<HistoryEntry>>>>,
    team_entries: Arc<RwLock<HashMap<TeamId, Vec<TeamAuditEntry>>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, entry: HistoryEntry) -> anyhow::Result<()> {
        self.entries
            .write()
            .await
            .entry(entry.task_id)
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn entries_for(&self, task_id: TaskId) -> anyhow::Result<Vec<HistoryEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .get(&task_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append_team_entry(&self, entry: TeamAuditEntry) -> anyhow::Result<()> {
        self.team_entries
            .write()
            .await
            .entry(entry.team_id)
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn team_entries(&self, team: TeamId) -> anyhow::Result<Vec<TeamAuditEntry>> {
        Ok(self
            .team_entries
            .read()
            .await
            .get(&team)
            .cloned()
            .unwrap_or_default())
    }
}

/// Records every event as a history entry
pub struct HistorySubscriber {
    store: Arc<dyn HistoryStore>,
}

impl HistorySubscriber {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventSubscriber for HistorySubscriber {
    fn name(&self) -> &str {
        "history"
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        self.store.append(HistoryEntry::from(event)).await
    }
}
