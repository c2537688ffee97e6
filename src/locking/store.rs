use async_trait::async_trait;
#[cfg(any(test, feature = "testing"))]
use mockall::automock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Shared key-value store the lock manager runs on.
///
/// Implementations must make both operations atomic with respect to every other client of
/// the store, including clients in other processes.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Set `key` to `value` with an expiry, only if the key is absent or expired.
    /// Returns whether the value was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool>;

    /// Current unexpired value of `key`
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Delete `key` only if it currently holds `expected`. Returns whether it was deleted.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Single-process stand-in for a networked store. Expiry follows the tokio clock, so paused
/// time in tests drives TTL reclamation.
#[derive(Debug, Clone, Default)]
pub struct InMemoryKeyValueStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> anyhow::Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("Key-value store mutex poisoned"))
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries()?;
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(false),
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: value.to_string(),
                        expires_at: now + ttl,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let now = Instant::now();
        let entries = self.entries()?;
        Ok(entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone()))
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> anyhow::Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries()?;
        let matches = entries
            .get(key)
            .is_some_and(|entry| entry.expires_at > now && entry.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_set_if_absent_refuses_live_key() {
        let store = InMemoryKeyValueStore::new();
        assert!(store.set_if_absent("k", "a", Duration::from_secs(5)).await.unwrap());
        assert!(!store.set_if_absent("k", "b", Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_key_can_be_reclaimed() {
        let store = InMemoryKeyValueStore::new();
        store.set_if_absent("k", "a", Duration::from_secs(5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.set_if_absent("k", "b", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_if_equals_checks_owner() {
        let store = InMemoryKeyValueStore::new();
        store.set_if_absent("k", "a", Duration::from_secs(5)).await.unwrap();

        assert!(!store.delete_if_equals("k", "b").await.unwrap());
        assert!(store.delete_if_equals("k", "a").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
