use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use shared::Result;
use std::fmt::Debug;
use std::time::{Duration, Instant};
use tripwire::{CacheAdapter, SetOptions};

#[derive(Clone, Debug)]
struct StoredValue {
    value: String,
    ttl: Option<Duration>,
}

/// Expiry policy reading each entry's own TTL, falling back to a default
struct PerEntryExpiry {
    default_ttl: Option<Duration>,
}

impl Expiry<String, StoredValue> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl.or(self.default_ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        // an overwrite restarts the clock with the new entry's TTL
        value.ttl.or(self.default_ttl)
    }
}

/// Moka-based cache adapter with per-entry TTL support
/// Provides lock-free, concurrent storage with optional size bounds
pub struct MokaCacheAdapter {
    cache: Cache<String, StoredValue>,
}

impl MokaCacheAdapter {
    /// Create a Moka adapter from name, optional capacity and optional default TTL
    pub fn new(name: &str, max_entries: Option<u64>, default_ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder()
            .name(name)
            .expire_after(PerEntryExpiry { default_ttl });

        if let Some(capacity) = max_entries {
            builder = builder.max_capacity(capacity);
        }

        Self {
            cache: builder.build(),
        }
    }

    /// Create a new unbounded adapter without a default TTL
    pub fn new_unbounded() -> Self {
        Self::new("tripwire", None, None)
    }
}

#[async_trait]
impl CacheAdapter for MokaCacheAdapter {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        // None when the key never existed or its TTL elapsed
        Ok(self.cache.get(key).await.map(|stored| stored.value))
    }

    async fn set(&self, key: &str, value: Option<String>, options: SetOptions) -> Result<()> {
        match value {
            Some(value) => {
                let stored = StoredValue {
                    value,
                    ttl: options.seconds_until_expiration.map(|e| e.as_duration()),
                };
                self.cache.insert(key.to_string(), stored).await;
            }
            None => self.cache.invalidate(key).await,
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.cache.iter().map(|(key, _)| String::clone(&key)).collect())
    }
}

impl Debug for MokaCacheAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaCacheAdapter")
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Expiry;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_moka_adapter_set_and_get() {
        let adapter = MokaCacheAdapter::new_unbounded();

        adapter
            .set("hello", Some("world".to_string()), SetOptions::default())
            .await
            .unwrap();

        assert_eq!(adapter.get("hello").await.unwrap(), Some("world".to_string()));
    }

    #[tokio::test]
    async fn test_moka_adapter_get_nonexistent() {
        let adapter = MokaCacheAdapter::new_unbounded();
        assert_eq!(adapter.get("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_moka_adapter_set_none_invalidates() {
        let adapter = MokaCacheAdapter::new_unbounded();

        adapter
            .set("test_key", Some("test_value".to_string()), SetOptions::default())
            .await
            .unwrap();
        adapter
            .set("test_key", None, SetOptions::default())
            .await
            .unwrap();

        assert_eq!(adapter.get("test_key").await.unwrap(), None);
        assert!(adapter.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_moka_adapter_invalidate_missing_is_ok() {
        let adapter = MokaCacheAdapter::new_unbounded();
        assert!(adapter.set("missing", None, SetOptions::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_moka_adapter_overwrite() {
        let adapter = MokaCacheAdapter::new_unbounded();

        adapter
            .set("key", Some("value1".to_string()), SetOptions::default())
            .await
            .unwrap();
        adapter
            .set("key", Some("value2".to_string()), SetOptions::default())
            .await
            .unwrap();

        assert_eq!(adapter.get("key").await.unwrap(), Some("value2".to_string()));
    }

    #[tokio::test]
    async fn test_moka_adapter_lists_keys() {
        let adapter = MokaCacheAdapter::new_unbounded();

        for key in ["a", "b", "c"] {
            adapter
                .set(key, Some(key.to_uppercase()), SetOptions::default())
                .await
                .unwrap();
        }

        let mut keys = adapter.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_moka_adapter_with_per_entry_ttl() {
        let adapter = MokaCacheAdapter::new_unbounded();

        adapter
            .set(
                "short",
                Some("gone soon".to_string()),
                SetOptions::expiring_in(Expiry(1)),
            )
            .await
            .unwrap();
        adapter
            .set("long", Some("stays".to_string()), SetOptions::default())
            .await
            .unwrap();

        assert!(adapter.get("short").await.unwrap().is_some());

        sleep(Duration::from_millis(1200)).await;

        assert_eq!(adapter.get("short").await.unwrap(), None);
        assert_eq!(adapter.get("long").await.unwrap(), Some("stays".to_string()));
    }

    #[tokio::test]
    async fn test_moka_adapter_with_default_ttl() {
        let adapter = MokaCacheAdapter::new("test", None, Some(Duration::from_millis(100)));

        adapter
            .set("default_ttl_key", Some("value".to_string()), SetOptions::default())
            .await
            .unwrap();
        assert!(adapter.get("default_ttl_key").await.unwrap().is_some());

        // Wait for expiration
        sleep(Duration::from_millis(150)).await;

        assert_eq!(adapter.get("default_ttl_key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_moka_adapter_bounded() {
        let adapter = MokaCacheAdapter::new("test", Some(2), None); // Max 2 entries

        for key in ["key1", "key2", "key3"] {
            adapter
                .set(key, Some("value".to_string()), SetOptions::default())
                .await
                .unwrap();
        }

        // Eviction is applied by pending maintenance tasks
        adapter.cache.run_pending_tasks().await;

        assert!(adapter.cache.entry_count() <= 2, "Cache should have at most 2 entries");
    }
}
