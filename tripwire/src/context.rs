use crate::codec::KeyCodec;
use crate::engine::TriggerTarget;
use crate::events::TriggerEvent;
use crate::mutation::{MutationConfig, MutationHandle};
use crate::ports::CacheAdapter;
use crate::query::{QueryCache, QueryConfig, QueryCore};
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Query caches reachable from the mutations of one context
#[derive(Default)]
pub(crate) struct TriggerRegistry {
    targets: RwLock<Vec<Arc<dyn TriggerTarget>>>,
    events: Option<broadcast::Sender<TriggerEvent>>,
}

impl TriggerRegistry {
    pub(crate) fn with_events(events: broadcast::Sender<TriggerEvent>) -> Self {
        Self {
            targets: RwLock::new(Vec::new()),
            events: Some(events),
        }
    }

    fn register(&self, target: Arc<dyn TriggerTarget>) {
        let mut targets = self.targets.write();
        if targets.iter().any(|existing| existing.name() == target.name()) {
            warn!(
                "Query name '{}' is already registered, keys will share a namespace",
                target.name()
            );
        }
        targets.push(target);
    }

    /// Snapshot in creation order
    pub(crate) fn targets(&self) -> Vec<Arc<dyn TriggerTarget>> {
        self.targets.read().clone()
    }

    pub(crate) fn events(&self) -> Option<&broadcast::Sender<TriggerEvent>> {
        self.events.as_ref()
    }
}

/// Shares one cache adapter between query caches and mutations
#[derive(Clone)]
pub struct Context {
    cache: Arc<dyn CacheAdapter>,
    registry: Arc<TriggerRegistry>,
}

impl Context {
    pub fn new(cache: Arc<dyn CacheAdapter>) -> Self {
        Self {
            cache,
            registry: Arc::new(TriggerRegistry::default()),
        }
    }

    /// Also publish every trigger outcome on `broadcaster`
    pub fn with_event_broadcaster(
        cache: Arc<dyn CacheAdapter>,
        broadcaster: broadcast::Sender<TriggerEvent>,
    ) -> Self {
        Self {
            cache,
            registry: Arc::new(TriggerRegistry::with_events(broadcaster)),
        }
    }

    /// Wrap a read operation with the default JSON codec
    pub fn query<I, O, E, F, Fut>(&self, config: QueryConfig, query: F) -> QueryCache<I, O, E>
    where
        I: Serialize + Send + Sync + 'static,
        O: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<O, E>> + Send + 'static,
    {
        self.query_with_codec(config, KeyCodec::json(), query)
    }

    /// Wrap a read operation with a custom key and/or value codec
    pub fn query_with_codec<I, O, E, F, Fut>(
        &self,
        config: QueryConfig,
        codec: KeyCodec<I, O>,
        query: F,
    ) -> QueryCache<I, O, E>
    where
        I: Send + Sync + 'static,
        O: Send + Sync + 'static,
        E: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<O, E>> + Send + 'static,
    {
        info!("Registering query cache '{}'", config.name);
        let core = Arc::new(QueryCore::new(config, self.cache.clone(), codec));
        self.registry.register(core.clone());
        QueryCache::new(core, query)
    }

    /// Wrap a write operation so its invocations reach every trigger
    pub fn mutation<MI, MO, ME, F, Fut>(
        &self,
        config: MutationConfig,
        mutation: F,
    ) -> MutationHandle<MI, MO, ME>
    where
        MI: Clone + Send + Sync + 'static,
        MO: Send + Sync + 'static,
        ME: Send + Sync + 'static,
        F: Fn(MI) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<MO, ME>> + Send + 'static,
    {
        info!("Registering mutation '{}'", config.name);
        MutationHandle::new(config, self.registry.clone(), mutation)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("queries", &self.registry.targets.read().len())
            .field("events", &self.registry.events.is_some())
            .finish()
    }
}
