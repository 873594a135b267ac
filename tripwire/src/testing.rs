use crate::ports::{CacheAdapter, SetOptions};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use shared::{Error, Expiry, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory adapter with switchable read/write failures
#[derive(Default)]
pub(crate) struct MemoryAdapter {
    entries: DashMap<String, String>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    refused_keys: DashSet<String>,
    last_expiry: Mutex<Option<Expiry>>,
}

impl MemoryAdapter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Refuse writes to one adapter key only
    pub(crate) fn refuse_key(&self, key: &str) {
        self.refused_keys.insert(key.to_string());
    }

    pub(crate) fn insert_raw(&self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    pub(crate) fn raw_keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub(crate) fn last_expiry(&self) -> Option<Expiry> {
        *self.last_expiry.lock()
    }
}

#[async_trait]
impl CacheAdapter for MemoryAdapter {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Adapter("read refused".to_string()));
        }
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: Option<String>, options: SetOptions) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) || self.refused_keys.contains(key) {
            return Err(Error::Adapter("write refused".to_string()));
        }
        *self.last_expiry.lock() = options.seconds_until_expiration;
        match value {
            Some(value) => {
                self.entries.insert(key.to_string(), value);
            }
            None => {
                self.entries.remove(key);
            }
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.raw_keys())
    }
}
