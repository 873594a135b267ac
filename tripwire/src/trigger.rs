use crate::codec::{BoxError, CacheKey};
use crate::engine::TriggerEngine;
use crate::mutation::{MutationHandle, MutationInvocation, MutationRef};
use crate::query::{CacheTargets, QueryCore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::{Error, Result};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

pub type AffectsFn<I, MI, MO> = Arc<
    dyn Fn(AffectsContext<'_, MI, MO>) -> std::result::Result<CacheTargets<I>, BoxError>
        + Send
        + Sync,
>;

pub type UpdateFn<O, MO> =
    Arc<dyn Fn(UpdateContext<'_, O, MO>) -> std::result::Result<O, BoxError> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Invalidate,
    Update,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerKind::Invalidate => write!(f, "invalidate"),
            TriggerKind::Update => write!(f, "update"),
        }
    }
}

/// What an `affects` callback sees for one mutation invocation
///
/// `mutation_output` is `None` when the mutation failed.
#[derive(Debug)]
pub struct AffectsContext<'a, MI, MO> {
    pub mutation_input: &'a MI,
    pub mutation_output: Option<&'a MO>,
    pub cached_query_keys: &'a [CacheKey],
}

/// What an `update` callback sees for one targeted cache entry
///
/// `cached_query_output` is `None` when nothing is cached under the key.
#[derive(Debug)]
pub struct UpdateContext<'a, O, MO> {
    pub cached_query_output: Option<O>,
    pub mutation_output: Option<&'a MO>,
}

pub(crate) enum TriggerAction<O, MO> {
    Invalidate,
    Update(UpdateFn<O, MO>),
}

impl<O, MO> TriggerAction<O, MO> {
    pub(crate) fn kind(&self) -> TriggerKind {
        match self {
            TriggerAction::Invalidate => TriggerKind::Invalidate,
            TriggerAction::Update(_) => TriggerKind::Update,
        }
    }
}

/// A trigger definition waiting to be added to a query cache
///
/// Built through [`TriggerSpec::invalidated_by`] or
/// [`TriggerSpec::updated_by`], so a spec is always exactly one of the two.
pub struct TriggerSpec<I, O, MI, MO, ME> {
    source: MutationRef,
    affects: AffectsFn<I, MI, MO>,
    action: TriggerAction<O, MO>,
    _mutation: PhantomData<fn() -> ME>,
}

impl<I, O, MI, MO, ME> TriggerSpec<I, O, MI, MO, ME> {
    /// Invalidate the entries `affects` names whenever `mutation` runs
    pub fn invalidated_by<A>(mutation: &MutationHandle<MI, MO, ME>, affects: A) -> Self
    where
        A: Fn(AffectsContext<'_, MI, MO>) -> std::result::Result<CacheTargets<I>, BoxError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            source: mutation.reference().clone(),
            affects: Arc::new(affects),
            action: TriggerAction::Invalidate,
            _mutation: PhantomData,
        }
    }

    /// Rewrite the entries `affects` names with `update` whenever `mutation` runs
    pub fn updated_by<A, U>(mutation: &MutationHandle<MI, MO, ME>, affects: A, update: U) -> Self
    where
        A: Fn(AffectsContext<'_, MI, MO>) -> std::result::Result<CacheTargets<I>, BoxError>
            + Send
            + Sync
            + 'static,
        U: Fn(UpdateContext<'_, O, MO>) -> std::result::Result<O, BoxError> + Send + Sync + 'static,
    {
        Self {
            source: mutation.reference().clone(),
            affects: Arc::new(affects),
            action: TriggerAction::Update(Arc::new(update)),
            _mutation: PhantomData,
        }
    }

    pub fn kind(&self) -> TriggerKind {
        self.action.kind()
    }

    pub fn source(&self) -> &MutationRef {
        &self.source
    }
}

impl<I, O, MI, MO, ME> TriggerSpec<I, O, MI, MO, ME>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
    MI: Send + Sync + 'static,
    MO: Send + Sync + 'static,
    ME: Send + Sync + 'static,
{
    pub(crate) fn into_trigger(self) -> Arc<dyn Trigger<I, O>> {
        Arc::new(RegisteredTrigger::<I, O, MI, MO, ME> {
            source: self.source,
            affects: self.affects,
            action: self.action,
            _mutation: PhantomData,
        })
    }
}

/// A trigger owned by a query cache, erased over its mutation's types
#[async_trait]
pub(crate) trait Trigger<I, O>: Send + Sync {
    fn source(&self) -> &MutationRef;

    fn kind(&self) -> TriggerKind;

    /// Apply this trigger for one invocation, returning the keys it touched
    async fn apply(
        &self,
        query: &QueryCore<I, O>,
        invocation: &(dyn Any + Send + Sync),
    ) -> Result<Vec<CacheKey>>;
}

struct RegisteredTrigger<I, O, MI, MO, ME> {
    source: MutationRef,
    affects: AffectsFn<I, MI, MO>,
    action: TriggerAction<O, MO>,
    _mutation: PhantomData<fn() -> ME>,
}

#[async_trait]
impl<I, O, MI, MO, ME> Trigger<I, O> for RegisteredTrigger<I, O, MI, MO, ME>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
    MI: Send + Sync + 'static,
    MO: Send + Sync + 'static,
    ME: Send + Sync + 'static,
{
    fn source(&self) -> &MutationRef {
        &self.source
    }

    fn kind(&self) -> TriggerKind {
        self.action.kind()
    }

    async fn apply(
        &self,
        query: &QueryCore<I, O>,
        invocation: &(dyn Any + Send + Sync),
    ) -> Result<Vec<CacheKey>> {
        let invocation = invocation
            .downcast_ref::<MutationInvocation<MI, MO, ME>>()
            .ok_or_else(|| {
                Error::Internal(format!(
                    "invocation of mutation '{}' has unexpected types",
                    self.source.name()
                ))
            })?;

        TriggerEngine::apply(query, &self.affects, &self.action, invocation).await
    }
}
