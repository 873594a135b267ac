use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::{Error, Expiry, Result};
use std::path::Path;
use tripwire::{CacheAdapter, SetOptions};

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    value: String,
    expires_at_ms: Option<i64>,
}

impl StoredRecord {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_some_and(|at| at <= now_ms)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Absolute expiry in epoch millis; `None` (never) when it does not fit an i64
fn expires_at_ms(expiry: Expiry) -> Option<i64> {
    i64::try_from(expiry.0)
        .ok()
        .and_then(|seconds| seconds.checked_mul(1000))
        .and_then(|ms| now_ms().checked_add(ms))
}

/// Sled-based on-disk cache adapter
/// Expiry is enforced lazily: expired records read as absent and are removed
pub struct SledCacheAdapter {
    db: sled::Db,
}

impl SledCacheAdapter {
    /// Open (or create) a Sled database at `path`
    /// Creates the parent directory if it doesn't exist
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Adapter(format!("Failed to create directory: {}", e)))?;
        }

        let db = sled::open(path)
            .map_err(|e| Error::Adapter(format!("Failed to open Sled database: {}", e)))?;

        Ok(Self { db })
    }

    fn decode(bytes: &[u8]) -> Result<StoredRecord> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Adapter(format!("Failed to decode record: {}", e)))
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| Error::Adapter(format!("Failed to remove key: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl CacheAdapter for SledCacheAdapter {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let bytes = self
            .db
            .get(key.as_bytes())
            .map_err(|e| Error::Adapter(format!("Failed to get key: {}", e)))?;

        let Some(bytes) = bytes else {
            return Ok(None);
        };

        let record = Self::decode(&bytes)?;
        if record.is_expired(now_ms()) {
            tracing::debug!("Removing expired key '{}'", key);
            self.remove(key)?;
            return Ok(None);
        }

        Ok(Some(record.value))
    }

    async fn set(&self, key: &str, value: Option<String>, options: SetOptions) -> Result<()> {
        match value {
            Some(value) => {
                let record = StoredRecord {
                    value,
                    expires_at_ms: options.seconds_until_expiration.and_then(expires_at_ms),
                };
                let bytes = serde_json::to_vec(&record)
                    .map_err(|e| Error::Adapter(format!("Failed to encode record: {}", e)))?;
                self.db
                    .insert(key.as_bytes(), bytes)
                    .map_err(|e| Error::Adapter(format!("Failed to insert key: {}", e)))?;
            }
            None => self.remove(key)?,
        }

        self.db
            .flush_async()
            .await
            .map_err(|e| Error::Adapter(format!("Failed to flush database: {}", e)))?;

        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let now = now_ms();
        let mut keys = Vec::new();

        for result in self.db.iter() {
            let (key, value) = result
                .map_err(|e| Error::Adapter(format!("Failed to iterate database: {}", e)))?;

            if Self::decode(&value)?.is_expired(now) {
                continue;
            }

            let key = String::from_utf8(key.to_vec())
                .map_err(|e| Error::Adapter(format!("Key is not UTF-8: {}", e)))?;
            keys.push(key);
        }

        Ok(keys)
    }
}

impl std::fmt::Debug for SledCacheAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledCacheAdapter")
            .field("len", &self.db.len())
            .finish()
    }
}
