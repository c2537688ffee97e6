// Domain events and their asynchronous fan-out to history, notifications and search

pub mod event;
pub mod fanout;
pub mod history;
pub mod notification;
pub mod search;

pub use event::{DomainEvent, EventKind};
pub use fanout::{EventFanout, EventPublisher, EventSubscriber, PublishError, SubscriberStats};
pub use history::{
    AuditSummary, HistoryEntry, HistoryStore, HistorySubscriber, InMemoryHistoryStore, TeamAuditEntry,
};
pub use notification::{
    EmailKind, EmailSender, InMemoryNotificationDispatcher, NotificationDispatcher,
    NotificationSubscriber, RecordingEmailSender, TaskNotification,
};
pub use search::{InMemorySearchIndex, SearchIndex, SearchIndexSubscriber, TaskDocument};
