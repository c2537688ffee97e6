// Distributed per-task locking over a shared key-value store

pub mod manager;
pub mod store;

pub use manager::{DistributedLockManager, LockManager};
#[cfg(any(test, feature = "testing"))]
pub use manager::MockLockManager;
pub use store::{InMemoryKeyValueStore, KeyValueStore};

use crate::tasks::{TaskId, UserId};
use std::sync::LazyLock;
use uuid::Uuid;

static INSTANCE_NAME: LazyLock<String> = LazyLock::new(|| {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
});

/// Lock name guarding edits to one task
pub fn task_lock_name(task_id: TaskId) -> String {
    format!("task_lock:{}", task_id)
}

/// Owner token for one lock attempt: `{hostname}:{actor}:{uuid}`.
///
/// Unique per attempt, so a stale release can never drop a lock that a later attempt by the
/// same user now holds.
pub fn lock_owner_token(actor: UserId) -> String {
    format!("{}:{}:{}", *INSTANCE_NAME, actor, Uuid::new_v4())
}
