// A failing subscriber must not disturb the others or the caller

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tasker::events::{
    DomainEvent, EmailKind, EmailSender, EventSubscriber, HistoryStore, NotificationDispatcher,
    NotificationSubscriber, TaskNotification,
};
use tasker::{InMemoryPipeline, NewTask, Task, TaskPatch, TaskStatus, TaskerConfig, UserId};

mod fixtures;
use fixtures::*;

/// Every delivery fails and every user appears online
struct BrokenDispatcher;

#[async_trait]
impl NotificationDispatcher for BrokenDispatcher {
    async fn is_online(&self, _user: UserId) -> bool {
        true
    }

    async fn send_to_user(
        &self,
        _user: UserId,
        _destination: &str,
        _notification: &TaskNotification,
    ) -> anyhow::Result<()> {
        anyhow::bail!("session broker unreachable")
    }
}

struct BrokenMailer;

#[async_trait]
impl EmailSender for BrokenMailer {
    async fn send(&self, _recipient: UserId, _kind: EmailKind, _task: &Task) -> anyhow::Result<()> {
        anyhow::bail!("smtp relay refused connection")
    }
}

/// Raises on every event, half of the time by panicking
struct ThrowingSubscriber {
    calls: AtomicUsize,
}

#[async_trait]
impl EventSubscriber for ThrowingSubscriber {
    fn name(&self) -> &str {
        "throwing"
    }

    async fn handle(&self, _event: &DomainEvent) -> anyhow::Result<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            panic!("subscriber blew up");
        }
        anyhow::bail!("subscriber failed")
    }
}

#[tokio::test]
async fn test_failing_notifications_do_not_affect_history_search_or_caller() {
    let config = TaskerConfig::default();
    let throwing = Arc::new(ThrowingSubscriber {
        calls: AtomicUsize::new(0),
    });
    let broken_notifications = Arc::new(NotificationSubscriber::new(
        Arc::new(BrokenDispatcher),
        Some(Arc::new(BrokenMailer)),
        &config.notifications,
    ));
    let pipeline = seed(InMemoryPipeline::with_subscribers(
        &config,
        vec![
            throwing.clone() as Arc<dyn EventSubscriber>,
            broken_notifications as Arc<dyn EventSubscriber>,
        ],
    ))
    .await;

    let task = pipeline
        .coordinator
        .create_task(
            ALICE,
            NewTask::new(TEAM, "Resilient task")
                .assigned_to(BOB)
                .watched_by([LEAD]),
        )
        .await
        .unwrap();
    let updated = pipeline
        .coordinator
        .update_task(
            task.id,
            ALICE,
            TaskPatch::at_version(0)
                .status(TaskStatus::InProgress)
                .assign(ALICE),
        )
        .await
        .unwrap();
    assert_eq!(updated.version, 1);

    pipeline.fanout.wait_idle().await;

    // created, watcher added, status field, assignee field, status changed, assigned
    let history = pipeline.history.entries_for(task.id).await.unwrap();
    assert_eq!(history.len(), 6);
    assert_eq!(throwing.calls.load(Ordering::SeqCst), 6);

    let document = pipeline.search.document(task.id).await.unwrap();
    assert_eq!(document.status, TaskStatus::InProgress);
    assert_eq!(document.version, 1);

    let stats = pipeline.fanout.subscriber_stats();
    let failed = |name: &str| -> u64 {
        stats
            .iter()
            .filter(|stats| stats.name == name)
            .map(|stats| stats.failed)
            .sum()
    };
    assert_eq!(failed("history"), 0);
    assert_eq!(failed("search-index"), 0);
    assert_eq!(failed("throwing"), 6);
    // The built-in notifier has nobody online; the broken one fails every event since
    // LEAD is watching and never the actor
    assert_eq!(failed("notification"), 6);
}
