#![deny(clippy::all)]

use async_trait::async_trait;
use shared::{Expiry, Result};

// Ports are the pluggable extension points for underlying storage backends

/// Options accepted by [`CacheAdapter::set`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub seconds_until_expiration: Option<Expiry>,
}

impl SetOptions {
    pub fn expiring_in(expiry: Expiry) -> Self {
        Self {
            seconds_until_expiration: Some(expiry),
        }
    }
}

/// Minimal storage contract every backend implements
///
/// Keys and values are plain strings. The core never assumes how a backend
/// stores or evicts entries.
#[async_trait]
pub trait CacheAdapter: Send + Sync + 'static {
    /// Read a value, `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value. Writing `None` invalidates the entry; backends may
    /// delete it or mark it expired, as long as the next `get` sees it absent.
    async fn set(&self, key: &str, value: Option<String>, options: SetOptions) -> Result<()>;

    /// Enumerate all keys currently held, in any order
    async fn keys(&self) -> Result<Vec<String>>;
}
