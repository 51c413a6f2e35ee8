//! Authorization manager contract

use crate::decision::Decision;
use crate::errors::VigilResult;
use crate::identity::DeferredIdentity;

/// Produces a decision for a subject on behalf of a deferred identity.
///
/// `S` is `Invocation` for before-call managers and `InvocationResult` for
/// after-call managers. Implementations must not mutate the subject and are
/// invoked at most once per call. A missing identity is reported as
/// `Decision::Denied` with `DenialReason::AuthenticationRequired`, never as
/// an error.
pub trait AuthorizationManager<S>: Send + Sync {
    /// Decide on `subject`.
    fn decide(&self, identity: &DeferredIdentity, subject: &S) -> VigilResult<Decision>;

    /// Name used in logs and events.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<S, F> AuthorizationManager<S> for F
where
    F: Fn(&DeferredIdentity, &S) -> VigilResult<Decision> + Send + Sync,
{
    fn decide(&self, identity: &DeferredIdentity, subject: &S) -> VigilResult<Decision> {
        self(identity, subject)
    }

    fn name(&self) -> &str {
        "closure"
    }
}
