//! Matching mutation invocations to the cache entries their triggers target.
//!
//! For one invocation every registered query cache is visited in creation
//! order, and each of its triggers sourced from the mutation is applied in
//! registration order. Every trigger runs inside its own failure boundary:
//! an error or panic is reported and the next trigger still runs.

use crate::codec::CacheKey;
use crate::context::TriggerRegistry;
use crate::events::{TriggerAppliedEvent, TriggerEvent, TriggerFailedEvent, now_timestamp};
use crate::mutation::{MutationInvocation, MutationRef};
use crate::query::QueryCore;
use crate::trigger::{AffectsContext, AffectsFn, TriggerAction, TriggerKind, UpdateContext};
use async_trait::async_trait;
use futures::FutureExt;
use shared::{Error, Result};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Anything that owns triggers and can receive mutation invocations
#[async_trait]
pub(crate) trait TriggerTarget: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(
        &self,
        mutation: &MutationRef,
        invocation: &(dyn Any + Send + Sync),
        events: Option<&broadcast::Sender<TriggerEvent>>,
    );
}

pub(crate) struct TriggerEngine;

impl TriggerEngine {
    /// Deliver one invocation to every trigger sourced from `mutation`
    ///
    /// Never fails; trigger failures are logged and broadcast.
    pub(crate) async fn dispatch(
        registry: &TriggerRegistry,
        mutation: &MutationRef,
        invocation: &(dyn Any + Send + Sync),
    ) {
        for target in registry.targets() {
            target
                .deliver(mutation, invocation, registry.events())
                .await;
        }
    }

    /// Evaluate `affects` and apply the trigger's action to the resolved keys
    pub(crate) async fn apply<I, O, MI, MO, ME>(
        query: &QueryCore<I, O>,
        affects: &AffectsFn<I, MI, MO>,
        action: &TriggerAction<O, MO>,
        invocation: &MutationInvocation<MI, MO, ME>,
    ) -> Result<Vec<CacheKey>>
    where
        I: Send + Sync + 'static,
        O: Send + Sync + 'static,
        MI: Send + Sync + 'static,
        MO: Send + Sync + 'static,
        ME: Send + Sync + 'static,
    {
        let cached_query_keys = query.cached_keys().await?;

        let targets = affects(AffectsContext {
            mutation_input: &invocation.input,
            mutation_output: invocation.output(),
            cached_query_keys: &cached_query_keys,
        })
        .map_err(|e| Error::Trigger(format!("affects failed: {}", e)))?;

        if targets.is_empty() {
            debug!("Trigger of query '{}' targeted no entries", query.name());
            return Ok(Vec::new());
        }

        let keys = query.resolve_targets(targets)?;

        match action {
            TriggerAction::Invalidate => query.invalidate_keys(&keys).await?,
            TriggerAction::Update(update) => {
                for key in &keys {
                    let cached_query_output = query.read(key).await?;
                    let next = update(UpdateContext {
                        cached_query_output,
                        mutation_output: invocation.output(),
                    })
                    .map_err(|e| Error::Trigger(format!("update failed: {}", e)))?;
                    query.write(key, &next).await?;
                }
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl<I, O> TriggerTarget for QueryCore<I, O>
where
    I: Send + Sync + 'static,
    O: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        QueryCore::name(self)
    }

    async fn deliver(
        &self,
        mutation: &MutationRef,
        invocation: &(dyn Any + Send + Sync),
        events: Option<&broadcast::Sender<TriggerEvent>>,
    ) {
        // snapshot so triggers added mid-delivery wait for the next invocation
        let triggers: Vec<_> = self
            .triggers
            .read()
            .iter()
            .filter(|trigger| trigger.source().id() == mutation.id())
            .cloned()
            .collect();

        for trigger in triggers {
            let kind = trigger.kind();
            let outcome = AssertUnwindSafe(trigger.apply(self, invocation))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(Error::Trigger(panic_message(panic.as_ref()))));

            let event = match outcome {
                Ok(keys) => {
                    debug!(
                        "Applied {} trigger of query '{}' for mutation '{}' to {} key(s)",
                        kind,
                        self.name(),
                        mutation.name(),
                        keys.len()
                    );
                    TriggerEvent::Applied(TriggerAppliedEvent {
                        query: self.name().to_string(),
                        mutation: mutation.name().to_string(),
                        kind,
                        keys,
                        timestamp: now_timestamp(),
                    })
                }
                Err(e) => {
                    warn!(
                        "{} trigger of query '{}' for mutation '{}' failed: {}",
                        kind,
                        self.name(),
                        mutation.name(),
                        e
                    );
                    TriggerEvent::Failed(TriggerFailedEvent {
                        query: self.name().to_string(),
                        mutation: mutation.name().to_string(),
                        kind,
                        error: e.to_string(),
                        timestamp: now_timestamp(),
                    })
                }
            };

            publish(events, event, kind);
        }
    }
}

fn publish(events: Option<&broadcast::Sender<TriggerEvent>>, event: TriggerEvent, kind: TriggerKind) {
    if let Some(broadcaster) = events {
        if let Err(e) = broadcaster.send(event) {
            debug!(
                "No subscribers for {} trigger event of query '{}'",
                kind,
                e.0.query()
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}
