// Tasker Library - Task mutation pipeline
// This exposes the core components for testing and integration

pub mod access;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod database;
pub mod errors;
pub mod events;
pub mod locking;
pub mod observability;
pub mod persistence;
pub mod pipeline;
pub mod shutdown;
pub mod tasks;
pub mod telemetry;
pub mod versioning;
pub mod workflows;

// Re-export key types for easy access
pub use access::{Authorizer, InMemoryTeamDirectory, Permission, TeamDirectory, TeamRole};
pub use cache::{CacheLayer, TaskCache};
pub use config::{config, init_config, TaskerConfig};
pub use coordinator::{CoordinatorParts, CoordinatorSettings, MutationCoordinator, RetryPolicy};
pub use database::{init_database, shutdown_database};
pub use errors::{MutationError, MutationResult};
pub use events::{
    DomainEvent, EventFanout, EventKind, EventPublisher, EventSubscriber, HistorySubscriber,
    NotificationSubscriber, SearchIndexSubscriber,
};
pub use locking::{DistributedLockManager, InMemoryKeyValueStore, KeyValueStore, LockManager};
pub use observability::{mutation_metrics, MutationMetrics, OperationTimer};
pub use persistence::{InMemoryTaskRepository, RepositoryError, TaskRepository};
pub use pipeline::InMemoryPipeline;
pub use shutdown::ShutdownCoordinator;
pub use tasks::{
    NewTask, Task, TaskId, TaskPatch, TaskPriority, TaskResponse, TaskStatus, TeamId, UserId,
};
pub use telemetry::{
    create_mutation_span, generate_correlation_id, init_telemetry, shutdown_telemetry,
};
pub use versioning::check_version;
pub use workflows::{WorkflowEngine, WorkflowSettings};
