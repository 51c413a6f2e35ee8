//! Streaming interception
//!
//! The asynchronous analogue of the blocking interceptor. Nothing runs until
//! the returned value is polled. Preparation then:
//!
//! 1. Resolves the caller identity once for the whole call
//! 2. Runs pre-filters and before-call managers; a denial becomes a failed
//!    sequence rather than an error returned from `invoke`
//! 3. Calls the underlying operation and adapts its result into a
//!    `DeferredSequence`
//!
//! Elements are then checked one at a time as they arrive. A single-valued
//! result goes through the after-call managers as an `InvocationResult`; on
//! a multi-valued result each manager acts as a keep verdict for the element.
//! Post-filters drop elements inline without buffering. The first failure
//! ends the sequence, and dropping the sequence drops the upstream with it so
//! no further element is evaluated.

use super::adapter::{AsyncReturn, DeferredSequence, ValueStream};
use super::chain::StagePlan;
use futures::future::FutureExt;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, debug_span, Instrument, Span};
use uuid::Uuid;
use vigil_core::{
    Cardinality, DeferredIdentity, Invocation, InvocationResult, OperationDescriptor, VigilError,
    VigilResult,
};

/// Underlying asynchronous operation.
pub type StreamingNext = Arc<dyn Fn(&Invocation) -> AsyncReturn + Send + Sync>;

/// Interceptor for one asynchronous operation.
#[derive(Clone)]
pub struct StreamInterceptor {
    plan: Arc<StagePlan>,
    next: StreamingNext,
}

/// Per-call state carried from element to element.
struct ElementGuard {
    plan: Arc<StagePlan>,
    identity: DeferredIdentity,
    invocation: Arc<Invocation>,
    span: Span,
}

impl StreamInterceptor {
    pub(crate) fn new(plan: Arc<StagePlan>, next: StreamingNext) -> Self {
        Self { plan, next }
    }

    /// The wrapped operation.
    pub fn operation(&self) -> &OperationDescriptor {
        self.plan.operation()
    }

    /// Call the operation with `arguments` under every configured check.
    ///
    /// The returned value has the operation's declared shape.
    pub fn invoke(&self, arguments: Vec<Value>) -> AsyncReturn {
        let call_id = Uuid::new_v4();
        let span = debug_span!(
            "intercept",
            operation = %self.plan.operation().id(),
            %call_id,
            mode = "streaming"
        );
        let cardinality = self.plan.cardinality();
        let shape = self.plan.operation().return_shape();

        let elements = prepare(self.plan.clone(), self.next.clone(), arguments, span.clone())
            .instrument(span)
            .flatten_stream()
            .boxed();

        DeferredSequence::from_elements(cardinality, elements).into_return(shape)
    }
}

impl fmt::Debug for StreamInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamInterceptor")
            .field("operation", self.plan.operation().id())
            .finish_non_exhaustive()
    }
}

async fn prepare(
    plan: Arc<StagePlan>,
    next: StreamingNext,
    arguments: Vec<Value>,
    span: Span,
) -> ValueStream {
    let identity = plan.current_identity();
    if plan.has_checks() {
        if let Err(err) = identity.resolve().await {
            debug!(error = %err, "Identity resolution failed");
            return failed(plan.cardinality(), plan.identity_unavailable(&identity, err));
        }
    }

    let mut invocation = Invocation::new(plan.operation().clone(), arguments);
    let approved = plan
        .pre_filter(&identity, &mut invocation)
        .and_then(|()| plan.check_before(&identity, &invocation));
    if let Err(err) = approved {
        return failed(plan.cardinality(), err);
    }

    let invocation = Arc::new(invocation);
    let upstream = DeferredSequence::adapt(next(invocation.as_ref()), plan.cardinality());
    debug!(cardinality = ?upstream.cardinality(), "Upstream sequence adapted");

    let guard = ElementGuard {
        plan,
        identity,
        invocation,
        span,
    };
    guard.apply(upstream.into_elements())
}

fn failed(cardinality: Cardinality, err: VigilError) -> ValueStream {
    DeferredSequence::failed(cardinality, err).into_elements()
}

impl ElementGuard {
    /// Check elements as they arrive, ending after the first failure.
    fn apply(self, elements: ValueStream) -> ValueStream {
        stream::unfold(Some((self, elements)), |state| async move {
            let (guard, mut elements) = state?;
            let span = guard.span.clone();
            async move {
                loop {
                    match elements.next().await? {
                        Ok(value) => match guard.admit(value) {
                            Ok(Some(value)) => return Some((Ok(value), Some((guard, elements)))),
                            Ok(None) => continue,
                            Err(err) => {
                                debug!(error = %err, "Sequence terminated by element check");
                                return Some((Err(err), None));
                            }
                        },
                        Err(err) => return Some((Err(err), None)),
                    }
                }
            }
            .instrument(span)
            .await
        })
        .boxed()
    }

    /// Verdict for one element: `None` drops it.
    fn admit(&self, value: Value) -> VigilResult<Option<Value>> {
        let plan = &self.plan;
        let value = match plan.cardinality() {
            Cardinality::Single => {
                let result = InvocationResult::new(self.invocation.clone(), value);
                plan.check_after(&self.identity, &result)?;
                result.into_result()
            }
            Cardinality::Multi => {
                let element = InvocationResult::new(self.invocation.clone(), value);
                if !plan.keep_after(&self.identity, &element)? {
                    return Ok(None);
                }
                element.into_result()
            }
        };

        if !plan.post_filter_element(&self.identity, &value, &self.invocation)? {
            debug!("Element dropped by post-filter");
            return Ok(None);
        }
        Ok(Some(value))
    }
}
