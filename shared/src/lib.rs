// shared/src/lib.rs

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cache adapter: {0}")]
    Adapter(String),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("trigger: {0}")]
    Trigger(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Seconds until a cache entry expires
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Expiry(pub u64);

impl Expiry {
    pub fn as_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.0)
    }
}

pub mod config;
