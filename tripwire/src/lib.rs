//! Query result caching kept consistent with mutations through triggers.
//!
//! A [`Context`] shares one [`CacheAdapter`] between any number of
//! [`QueryCache`]s and [`MutationHandle`]s. Each query cache owns the triggers
//! that connect a mutation invocation to the cache entries it invalidates or
//! rewrites. Triggers fire on every invocation, including failed ones.

pub mod codec;
pub mod context;
pub mod engine;
pub mod events;
pub mod mutation;
pub mod ports;
pub mod query;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;

pub use codec::{BoxError, CacheKey, KeyCodec};
pub use context::Context;
pub use events::TriggerEvent;
pub use mutation::{MutationConfig, MutationHandle, MutationInvocation, MutationRef};
pub use ports::{CacheAdapter, SetOptions};
pub use query::{CacheTargets, QueryCache, QueryConfig};
pub use trigger::{AffectsContext, TriggerKind, TriggerSpec, UpdateContext};
