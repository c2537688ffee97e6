use super::store::KeyValueStore;
use async_trait::async_trait;
#[cfg(any(test, feature = "testing"))]
use mockall::automock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Named, TTL-bounded mutual exclusion shared by every server instance.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Take the lock if nobody holds it. Never waits: a held lock returns `false` at once.
    /// A zero `ttl` is an error.
    async fn try_acquire(&self, lock_name: &str, owner: &str, ttl: Duration) -> anyhow::Result<bool>;

    /// Give up the lock if `owner` still holds it. A lock that already expired, or was
    /// reclaimed by another owner, is left alone and is not an error.
    async fn release(&self, lock_name: &str, owner: &str) -> anyhow::Result<()>;
}

/// Lock manager over any atomic set-if-absent store
pub struct DistributedLockManager {
    store: Arc<dyn KeyValueStore>,
    key_prefix: String,
}

impl DistributedLockManager {
    pub fn new(store: Arc<dyn KeyValueStore>, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
        }
    }

    fn key(&self, lock_name: &str) -> String {
        format!("{}{}", self.key_prefix, lock_name)
    }

    /// Current holder of a lock, if any
    pub async fn holder(&self, lock_name: &str) -> anyhow::Result<Option<String>> {
        self.store.get(&self.key(lock_name)).await
    }
}

#[async_trait]
impl LockManager for DistributedLockManager {
    async fn try_acquire(&self, lock_name: &str, owner: &str, ttl: Duration) -> anyhow::Result<bool> {
        anyhow::ensure!(!ttl.is_zero(), "Lock {} requested with a zero TTL", lock_name);
        let acquired = self.store.set_if_absent(&self.key(lock_name), owner, ttl).await?;
        if acquired {
            debug!(lock = %lock_name, owner = %owner, ttl_secs = ttl.as_secs(), "Lock acquired");
        } else {
            debug!(lock = %lock_name, owner = %owner, "Lock held by another owner");
        }
        Ok(acquired)
    }

    async fn release(&self, lock_name: &str, owner: &str) -> anyhow::Result<()> {
        let released = self
            .store
            .delete_if_equals(&self.key(lock_name), owner)
            .await?;
        if released {
            debug!(lock = %lock_name, owner = %owner, "Lock released");
        } else {
            warn!(
                lock = %lock_name,
                owner = %owner,
                "Lock no longer held by this owner at release; it expired or was reclaimed"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::store::{InMemoryKeyValueStore, MockKeyValueStore};
    use mockall::predicate::eq;

    fn manager() -> DistributedLockManager {
        DistributedLockManager::new(Arc::new(InMemoryKeyValueStore::new()), "tasker:lock:")
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_acquire_fails_until_release() {
        let locks = manager();
        let ttl = Duration::from_secs(30);

        assert!(locks.try_acquire("task_lock:1", "alice", ttl).await.unwrap());
        assert!(!locks.try_acquire("task_lock:1", "bob", ttl).await.unwrap());

        locks.release("task_lock:1", "alice").await.unwrap();
        assert!(locks.try_acquire("task_lock:1", "bob", ttl).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_by_non_owner_keeps_lock() {
        let locks = manager();
        let ttl = Duration::from_secs(30);
        locks.try_acquire("task_lock:1", "alice", ttl).await.unwrap();

        locks.release("task_lock:1", "bob").await.unwrap();

        assert_eq!(locks.holder("task_lock:1").await.unwrap().as_deref(), Some("alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_after_expiry_is_not_an_error() {
        let locks = manager();
        locks
            .try_acquire("task_lock:1", "alice", Duration::from_secs(30))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(locks
            .try_acquire("task_lock:1", "bob", Duration::from_secs(30))
            .await
            .unwrap());

        assert!(locks.release("task_lock:1", "alice").await.is_ok());
        assert_eq!(locks.holder("task_lock:1").await.unwrap().as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_keys_carry_prefix() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_set_if_absent()
            .with(eq("tasker:lock:task_lock:9"), eq("owner"), eq(Duration::from_secs(10)))
            .times(1)
            .returning(|_, _, _| Ok(true));

        let locks = DistributedLockManager::new(Arc::new(store), "tasker:lock:");
        assert!(locks
            .try_acquire("task_lock:9", "owner", Duration::from_secs(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_store_failure_propagates_from_acquire() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_set_if_absent()
            .returning(|_, _, _| Err(anyhow::anyhow!("connection refused")));

        let locks = DistributedLockManager::new(Arc::new(store), "");
        assert!(locks
            .try_acquire("task_lock:1", "owner", Duration::from_secs(10))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_zero_ttl_is_refused_before_touching_the_store() {
        let mut store = MockKeyValueStore::new();
        store.expect_set_if_absent().never();
        let locks = DistributedLockManager::new(Arc::new(store), "");

        assert!(locks
            .try_acquire("task_lock:1", "a", Duration::ZERO)
            .await
            .is_err());
        assert!(locks
            .try_acquire("task_lock:1", "b", Duration::ZERO)
            .await
            .is_err());
    }
}
