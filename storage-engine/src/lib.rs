//! Storage backends implementing the `CacheAdapter` port.

pub mod moka_cache;
pub mod sled_cache;

pub use moka_cache::MokaCacheAdapter;
pub use sled_cache::SledCacheAdapter;
