//! Blocking interception
//!
//! Runs the full stage sequence on the calling thread:
//!
//! ```text
//! Entered -> PreFiltered -> BeforeChecked -> Invoked -> AfterChecked -> PostFiltered -> Returned
//!                                 |                         |
//!                                 +-------> Denied <--------+
//!                                           Invoked -> Failed
//! ```
//!
//! A failure from the underlying call skips the after-call and post-filter
//! stages and reaches the caller unchanged.

use super::chain::StagePlan;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, debug_span, trace};
use uuid::Uuid;
use vigil_core::{
    DeferredIdentity, Invocation, InvocationResult, OperationDescriptor, VigilError, VigilResult,
};

/// Underlying blocking operation.
pub type BlockingNext = Arc<dyn Fn(&Invocation) -> VigilResult<Value> + Send + Sync>;

/// Progress of one blocking call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Call received
    Entered,
    /// Designated arguments filtered
    PreFiltered,
    /// Before-call managers passed
    BeforeChecked,
    /// Underlying operation returned
    Invoked,
    /// After-call managers passed
    AfterChecked,
    /// Result filtered
    PostFiltered,
    /// Result handed back
    Returned,
    /// A decision was denied
    Denied,
    /// Evaluation or the underlying operation failed
    Failed,
}

struct CallTracker {
    state: CallState,
}

impl CallTracker {
    fn new() -> Self {
        trace!(state = ?CallState::Entered, "Call state");
        Self {
            state: CallState::Entered,
        }
    }

    fn advance(&mut self, next: CallState) {
        trace!(from = ?self.state, to = ?next, "Call state");
        self.state = next;
    }

    fn fail(&mut self, err: &VigilError) {
        self.advance(if err.is_denied() {
            CallState::Denied
        } else {
            CallState::Failed
        });
    }
}

/// Interceptor for one blocking operation.
#[derive(Clone)]
pub struct SyncInterceptor {
    plan: Arc<StagePlan>,
    next: BlockingNext,
}

impl SyncInterceptor {
    pub(crate) fn new(plan: Arc<StagePlan>, next: BlockingNext) -> Self {
        Self { plan, next }
    }

    /// The wrapped operation.
    pub fn operation(&self) -> &OperationDescriptor {
        self.plan.operation()
    }

    /// Call the operation with `arguments` under every configured check.
    pub fn invoke(&self, arguments: Vec<Value>) -> VigilResult<Value> {
        let call_id = Uuid::new_v4();
        let span = debug_span!(
            "intercept",
            operation = %self.plan.operation().id(),
            %call_id,
            mode = "blocking"
        );
        let _entered = span.enter();

        let identity = self.plan.current_identity();
        let mut tracker = CallTracker::new();
        let outcome = self.run(&identity, arguments, &mut tracker);
        match &outcome {
            Ok(_) => tracker.advance(CallState::Returned),
            Err(err) => {
                debug!(error = %err, "Intercepted call failed");
                tracker.fail(err);
            }
        }
        outcome
    }

    fn run(
        &self,
        identity: &DeferredIdentity,
        arguments: Vec<Value>,
        tracker: &mut CallTracker,
    ) -> VigilResult<Value> {
        let mut invocation = Invocation::new(self.plan.operation().clone(), arguments);

        self.plan.pre_filter(identity, &mut invocation)?;
        tracker.advance(CallState::PreFiltered);

        self.plan.check_before(identity, &invocation)?;
        tracker.advance(CallState::BeforeChecked);

        let invocation = Arc::new(invocation);
        let result = (self.next)(invocation.as_ref())?;
        tracker.advance(CallState::Invoked);

        let result = InvocationResult::new(invocation.clone(), result);
        self.plan.check_after(identity, &result)?;
        tracker.advance(CallState::AfterChecked);

        let value = self
            .plan
            .post_filter_value(identity, result.into_result(), &invocation)?;
        tracker.advance(CallState::PostFiltered);

        Ok(value)
    }
}

impl fmt::Debug for SyncInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncInterceptor")
            .field("operation", self.plan.operation().id())
            .finish_non_exhaustive()
    }
}
