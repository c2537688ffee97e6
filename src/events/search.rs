use super::event::{DomainEvent, EventKind};
use super::fanout::EventSubscriber;
use crate::tasks::{Task, TaskId, TaskPriority, TaskStatus, TeamId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Searchable projection of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDocument {
    pub task_id: TaskId,
    pub team_id: TeamId,
    pub name: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assigned_user_id: Option<UserId>,
    pub labels: BTreeSet<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_effort: Option<u32>,
    pub version: u64,
}

impl From<&Task> for TaskDocument {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            team_id: task.team_id,
            name: task.name.clone(),
            description: task.description.clone(),
            status: task.status,
            priority: task.priority,
            assigned_user_id: task.assigned_user,
            labels: task.labels.clone(),
            due_date: task.due_date,
            estimated_effort: task.estimated_effort,
            version: task.version,
        }
    }
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn index(&self, document: TaskDocument) -> anyhow::Result<()>;

    async fn remove(&self, task_id: TaskId) -> anyhow::Result<()>;
}

/// Keeps the search index in step with task mutations
pub struct SearchIndexSubscriber {
    index: Arc<dyn SearchIndex>,
}

impl SearchIndexSubscriber {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl EventSubscriber for SearchIndexSubscriber {
    fn name(&self) -> &str {
        "search-index"
    }

    async fn handle(&self, event: &DomainEvent) -> anyhow::Result<()> {
        match event.kind {
            EventKind::TaskDeleted => {
                debug!(task_id = %event.task_id(), "Removing task from search index");
                self.index.remove(event.task_id()).await
            }
            _ => self.index.index(TaskDocument::from(event.task.as_ref())).await,
        }
    }
}

/// Document map with naive substring matching
#[derive(Debug, Clone, Default)]
pub struct InMemorySearchIndex {
    documents: Arc<RwLock<HashMap<TaskId, TaskDocument>>>,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn document(&self, task_id: TaskId) -> Option<TaskDocument> {
        self.documents.read().await.get(&task_id).cloned()
    }

    /// Documents of `team` whose name or description contains `text`, case-insensitively
    pub async fn search(&self, team: TeamId, text: &str) -> Vec<TaskDocument> {
        let needle = text.to_lowercase();
        let documents = self.documents.read().await;
        let mut hits: Vec<TaskDocument> = documents
            .values()
            .filter(|doc| doc.team_id == team)
            .filter(|doc| {
                doc.name.to_lowercase().contains(&needle)
                    || doc
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        hits.sort_by_key(|doc| doc.task_id);
        hits
    }
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn index(&self, document: TaskDocument) -> anyhow::Result<()> {
        let mut documents = self.documents.write().await;
        // Events can be replayed; never let an older post-image overwrite a newer one
        if let Some(existing) = documents.get(&document.task_id) {
            if existing.version > document.version {
                return Ok(());
            }
        }
        documents.insert(document.task_id, document);
        Ok(())
    }

    async fn remove(&self, task_id: TaskId) -> anyhow::Result<()> {
        self.documents.write().await.remove(&task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: u64, name: &str, version: u64) -> Arc<Task> {
        let now = Utc::now();
        Arc::new(Task {
            id: TaskId(id),
            team_id: TeamId(1),
            name: name.to_string(),
            description: Some("Quarterly planning".to_string()),
            assigned_user: None,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            due_date: None,
            estimated_effort: None,
            labels: BTreeSet::new(),
            watchers: BTreeSet::new(),
            locked: false,
            final_status: false,
            version,
            created_by: UserId(1),
            created_at: now,
            updated_at: now,
            deleted: false,
        })
    }

    #[tokio::test]
    async fn test_updates_reindex_and_deletes_remove() {
        let index = Arc::new(InMemorySearchIndex::new());
        let subscriber = SearchIndexSubscriber::new(index.clone());

        subscriber
            .handle(&DomainEvent::new(EventKind::TaskCreated, task(1, "Draft roadmap", 0), UserId(1)))
            .await
            .unwrap();
        subscriber
            .handle(&DomainEvent::new(EventKind::TaskUpdated, task(1, "Final roadmap", 1), UserId(1)))
            .await
            .unwrap();
        assert_eq!(index.document(TaskId(1)).await.unwrap().name, "Final roadmap");
        assert_eq!(index.search(TeamId(1), "PLANNING").await.len(), 1);

        subscriber
            .handle(&DomainEvent::new(EventKind::TaskDeleted, task(1, "Final roadmap", 2), UserId(1)))
            .await
            .unwrap();
        assert!(index.document(TaskId(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_older_post_image_does_not_overwrite_newer() {
        let index = InMemorySearchIndex::new();
        index.index(TaskDocument::from(task(1, "newer", 3).as_ref())).await.unwrap();
        index.index(TaskDocument::from(task(1, "older", 2).as_ref())).await.unwrap();
        assert_eq!(index.document(TaskId(1)).await.unwrap().name, "newer");
    }
}
