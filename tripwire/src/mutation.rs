use crate::context::TriggerRegistry;
use crate::engine::TriggerEngine;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub type MutationFn<MI, MO, ME> =
    Arc<dyn Fn(MI) -> BoxFuture<'static, std::result::Result<MO, ME>> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct MutationConfig {
    pub name: String,
}

impl MutationConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Identity of a mutation, used by triggers to match invocations
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MutationRef {
    id: Uuid,
    name: String,
}

impl MutationRef {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Record of one mutation call, handed to every matching trigger
///
/// `outcome` is `None` when the mutation panicked.
#[derive(Debug)]
pub struct MutationInvocation<MI, MO, ME> {
    pub input: MI,
    pub outcome: Option<std::result::Result<MO, ME>>,
}

impl<MI, MO, ME> MutationInvocation<MI, MO, ME> {
    pub fn new(input: MI, outcome: std::result::Result<MO, ME>) -> Self {
        Self {
            input,
            outcome: Some(outcome),
        }
    }

    pub(crate) fn panicked(input: MI) -> Self {
        Self {
            input,
            outcome: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Some(Ok(_)))
    }

    pub fn is_panicked(&self) -> bool {
        self.outcome.is_none()
    }

    pub fn output(&self) -> Option<&MO> {
        self.outcome.as_ref().and_then(|outcome| outcome.as_ref().ok())
    }

    pub fn error(&self) -> Option<&ME> {
        self.outcome.as_ref().and_then(|outcome| outcome.as_ref().err())
    }
}

/// A write operation whose every invocation is delivered to its triggers
pub struct MutationHandle<MI, MO, ME> {
    reference: MutationRef,
    mutation: MutationFn<MI, MO, ME>,
    registry: Arc<TriggerRegistry>,
}

impl<MI, MO, ME> Clone for MutationHandle<MI, MO, ME> {
    fn clone(&self) -> Self {
        Self {
            reference: self.reference.clone(),
            mutation: self.mutation.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<MI, MO, ME> std::fmt::Debug for MutationHandle<MI, MO, ME> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationHandle")
            .field("reference", &self.reference)
            .finish()
    }
}

impl<MI, MO, ME> MutationHandle<MI, MO, ME> {
    pub fn reference(&self) -> &MutationRef {
        &self.reference
    }

    pub fn name(&self) -> &str {
        self.reference.name()
    }
}

impl<MI, MO, ME> MutationHandle<MI, MO, ME>
where
    MI: Clone + Send + Sync + 'static,
    MO: Send + Sync + 'static,
    ME: Send + Sync + 'static,
{
    pub(crate) fn new<F, Fut>(config: MutationConfig, registry: Arc<TriggerRegistry>, mutation: F) -> Self
    where
        F: Fn(MI) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<MO, ME>> + Send + 'static,
    {
        Self {
            reference: MutationRef::new(config.name),
            mutation: Arc::new(move |input| mutation(input).boxed()),
            registry,
        }
    }

    /// Run the mutation, then deliver the invocation to every trigger
    ///
    /// Delivery happens on success, failure and panic alike, before returning.
    /// A failure is handed back to the caller unchanged and a panic resumes
    /// once triggers have run; trigger failures never reach the caller.
    pub async fn execute(&self, input: MI) -> std::result::Result<MO, ME> {
        let settled = AssertUnwindSafe((self.mutation)(input.clone()))
            .catch_unwind()
            .await;

        let (invocation, panic) = match settled {
            Ok(outcome) => (MutationInvocation::new(input, outcome), None),
            Err(panic) => {
                warn!(
                    "Mutation '{}' panicked, delivering to triggers before resuming",
                    self.reference.name()
                );
                (MutationInvocation::panicked(input), Some(panic))
            }
        };

        debug!(
            "Mutation '{}' settled (success: {}), delivering to triggers",
            self.reference.name(),
            invocation.is_success()
        );
        TriggerEngine::dispatch(&self.registry, &self.reference, &invocation).await;

        match (invocation.outcome, panic) {
            (_, Some(panic)) => std::panic::resume_unwind(panic),
            (Some(outcome), None) => outcome,
            (None, None) => unreachable!("only a panic leaves an invocation without outcome"),
        }
    }
}
