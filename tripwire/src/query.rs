use crate::codec::{BoxError, CacheKey, KeyCodec};
use crate::mutation::MutationHandle;
use crate::ports::{CacheAdapter, SetOptions};
use crate::trigger::{AffectsContext, Trigger, TriggerSpec, UpdateContext};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use shared::{Expiry, Result};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Separates a query's name from its cache keys at the adapter level
pub const NAMESPACE_SEPARATOR: &str = "::";

/// Percent-escape `%` and `:` in a query name
///
/// An escaped name never contains the separator, so the first separator in
/// an adapter key always ends the namespace.
fn escape_namespace(name: &str) -> String {
    name.replace('%', "%25").replace(':', "%3A")
}

pub type QueryFn<I, O, E> =
    Arc<dyn Fn(I) -> BoxFuture<'static, std::result::Result<O, E>> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct QueryConfig {
    pub name: String,           // namespace for this query's keys
    pub expiry: Option<Expiry>, // applied to every write, None = backend default
}

impl QueryConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expiry: None,
        }
    }

    pub fn with_expiry(mut self, seconds: u64) -> Self {
        self.expiry = Some(Expiry(seconds));
        self
    }
}

/// Which cache entries an operation targets
///
/// Literal keys and inputs are combined; each input is run through the
/// query's key serializer.
#[derive(Clone, Debug)]
pub struct CacheTargets<I> {
    pub keys: Vec<CacheKey>,
    pub inputs: Vec<I>,
}

impl<I> Default for CacheTargets<I> {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            inputs: Vec::new(),
        }
    }
}

impl<I> CacheTargets<I> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn for_input(input: I) -> Self {
        Self::for_inputs(vec![input])
    }

    pub fn for_inputs(inputs: Vec<I>) -> Self {
        Self {
            keys: Vec::new(),
            inputs,
        }
    }

    pub fn for_keys(keys: impl IntoIterator<Item = CacheKey>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            inputs: Vec::new(),
        }
    }

    pub fn and_input(mut self, input: I) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn and_key(mut self, key: impl Into<CacheKey>) -> Self {
        self.keys.push(key.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.inputs.is_empty()
    }
}

/// Storage side of a query cache, shared with the trigger engine
pub(crate) struct QueryCore<I, O> {
    name: String,
    namespace: String,
    cache: Arc<dyn CacheAdapter>,
    codec: KeyCodec<I, O>,
    options: SetOptions,
    pub(crate) triggers: RwLock<Vec<Arc<dyn Trigger<I, O>>>>,
}

impl<I, O> QueryCore<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    pub(crate) fn new(config: QueryConfig, cache: Arc<dyn CacheAdapter>, codec: KeyCodec<I, O>) -> Self {
        Self {
            namespace: escape_namespace(&config.name),
            name: config.name,
            cache,
            codec,
            options: SetOptions {
                seconds_until_expiration: config.expiry,
            },
            triggers: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}{}", self.namespace, NAMESPACE_SEPARATOR, key)
    }

    /// Keys currently held for this query, without the namespace prefix
    pub(crate) async fn cached_keys(&self) -> Result<Vec<CacheKey>> {
        let prefix = self.storage_key("");
        let keys = self.cache.keys().await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    /// Union of literal keys and serialized inputs, first occurrence wins
    pub(crate) fn resolve_targets(&self, targets: CacheTargets<I>) -> Result<Vec<CacheKey>> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(targets.keys.len() + targets.inputs.len());

        for key in targets.keys {
            if seen.insert(key.clone()) {
                resolved.push(key);
            }
        }
        for input in &targets.inputs {
            let key = self.codec.serialize_key(input)?;
            if seen.insert(key.clone()) {
                resolved.push(key);
            }
        }

        Ok(resolved)
    }

    pub(crate) async fn read(&self, key: &str) -> Result<Option<O>> {
        match self.cache.get(&self.storage_key(key)).await? {
            Some(text) => Ok(Some(self.codec.deserialize_value(&text)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn write(&self, key: &str, value: &O) -> Result<()> {
        let text = self.codec.serialize_value(value)?;
        self.cache
            .set(&self.storage_key(key), Some(text), self.options)
            .await
    }

    /// Invalidate every key, returning the first failure once all were tried
    pub(crate) async fn invalidate_keys(&self, keys: &[CacheKey]) -> Result<()> {
        let mut first_error = None;
        for key in keys {
            match self
                .cache
                .set(&self.storage_key(key), None, SetOptions::default())
                .await
            {
                Ok(()) => debug!("Invalidated key '{}' of query '{}'", key, self.name),
                Err(e) => {
                    warn!("Failed to invalidate key '{}' of query '{}': {}", key, self.name, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub(crate) async fn update_keys<F>(&self, keys: &[CacheKey], to_value: F) -> Result<()>
    where
        F: Fn(Option<O>) -> O + Send + Sync,
    {
        for key in keys {
            let current = self.read(key).await?;
            let next = to_value(current);
            self.write(key, &next).await?;
            debug!("Updated key '{}' of query '{}'", key, self.name);
        }
        Ok(())
    }
}

/// A cached read operation
///
/// Cloning is cheap; clones share the same triggers and storage.
pub struct QueryCache<I, O, E> {
    core: Arc<QueryCore<I, O>>,
    query: QueryFn<I, O, E>,
}

impl<I, O, E> Clone for QueryCache<I, O, E> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            query: self.query.clone(),
        }
    }
}

impl<I, O, E> std::fmt::Debug for QueryCache<I, O, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("name", &self.core.name)
            .field("triggers", &self.core.triggers.read().len())
            .finish()
    }
}

impl<I, O, E> QueryCache<I, O, E>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
    E: Send + 'static,
{
    pub(crate) fn new<F, Fut>(core: Arc<QueryCore<I, O>>, query: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<O, E>> + Send + 'static,
    {
        Self {
            core,
            query: Arc::new(move |input| query(input).boxed()),
        }
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    /// The cache key this query stores `input` under
    pub fn key_for(&self, input: &I) -> Result<CacheKey> {
        self.core.codec.serialize_key(input)
    }

    /// Keys currently cached for this query
    pub async fn cached_keys(&self) -> Result<Vec<CacheKey>> {
        self.core.cached_keys().await
    }

    /// Return the cached output for `input`, or run the query and cache it
    ///
    /// Cache failures never fail the call: an unreadable entry is treated as a
    /// miss and a failed write only loses the cached copy. Concurrent misses
    /// for the same input both run the query; the last write wins.
    pub async fn execute(&self, input: I) -> std::result::Result<O, E> {
        let key = match self.core.codec.serialize_key(&input) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!("Query '{}' bypassing cache: {}", self.core.name, e);
                None
            }
        };

        if let Some(key) = &key {
            match self.core.read(key).await {
                Ok(Some(output)) => {
                    debug!("Cache hit for key '{}' of query '{}'", key, self.core.name);
                    return Ok(output);
                }
                Ok(None) => debug!("Cache miss for key '{}' of query '{}'", key, self.core.name),
                Err(e) => warn!(
                    "Cache read failed for key '{}' of query '{}', treating as miss: {}",
                    key, self.core.name, e
                ),
            }
        }

        let output = (self.query)(input).await?;

        if let Some(key) = &key {
            if let Err(e) = self.core.write(key, &output).await {
                warn!(
                    "Failed to cache result for key '{}' of query '{}': {}",
                    key, self.core.name, e
                );
            }
        }

        Ok(output)
    }

    /// Invalidate the targeted entries; absent entries are a no-op
    pub async fn invalidate(&self, targets: CacheTargets<I>) -> Result<()> {
        let keys = self.core.resolve_targets(targets)?;
        self.core.invalidate_keys(&keys).await
    }

    /// Rewrite the targeted entries without running the query
    ///
    /// `to_value` receives `None` for entries that are not cached.
    pub async fn update<F>(&self, targets: CacheTargets<I>, to_value: F) -> Result<()>
    where
        F: Fn(Option<O>) -> O + Send + Sync,
    {
        let keys = self.core.resolve_targets(targets)?;
        self.core.update_keys(&keys, to_value).await
    }

    /// Register a trigger; triggers apply in registration order
    pub fn add_trigger<MI, MO, ME>(&self, spec: TriggerSpec<I, O, MI, MO, ME>)
    where
        MI: Send + Sync + 'static,
        MO: Send + Sync + 'static,
        ME: Send + Sync + 'static,
    {
        debug!(
            "Query '{}' registered {} trigger for mutation '{}'",
            self.core.name,
            spec.kind(),
            spec.source().name()
        );
        self.core.triggers.write().push(spec.into_trigger());
    }

    /// Shorthand for `add_trigger(TriggerSpec::invalidated_by(..))`
    pub fn invalidated_by<MI, MO, ME, A>(&self, mutation: &MutationHandle<MI, MO, ME>, affects: A)
    where
        MI: Send + Sync + 'static,
        MO: Send + Sync + 'static,
        ME: Send + Sync + 'static,
        A: Fn(AffectsContext<'_, MI, MO>) -> std::result::Result<CacheTargets<I>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.add_trigger(TriggerSpec::invalidated_by(mutation, affects));
    }

    /// Shorthand for `add_trigger(TriggerSpec::updated_by(..))`
    pub fn updated_by<MI, MO, ME, A, U>(
        &self,
        mutation: &MutationHandle<MI, MO, ME>,
        affects: A,
        update: U,
    ) where
        MI: Send + Sync + 'static,
        MO: Send + Sync + 'static,
        ME: Send + Sync + 'static,
        A: Fn(AffectsContext<'_, MI, MO>) -> std::result::Result<CacheTargets<I>, BoxError>
            + Send
            + Sync
            + 'static,
        U: Fn(UpdateContext<'_, O, MO>) -> std::result::Result<O, BoxError> + Send + Sync + 'static,
    {
        self.add_trigger(TriggerSpec::updated_by(mutation, affects, update));
    }
}
