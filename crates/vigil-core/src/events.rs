//! Authorization events
//!
//! Each denial, and optionally each grant, is reported to an
//! `AuthorizationEventPublisher` after the decision is made.

use crate::decision::DenialReason;
use crate::invocation::OperationId;
use crate::ordering::InterceptorKind;
use serde::{Deserialize, Serialize};

/// What a decision concluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventOutcome {
    /// The check passed.
    Granted,
    /// The check refused access.
    Denied {
        /// Why access was refused.
        reason: DenialReason,
    },
}

/// One reported authorization decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationEvent {
    /// Operation being called.
    pub operation: OperationId,
    /// Stage that decided.
    pub stage: InterceptorKind,
    /// Principal, if an identity had been resolved.
    pub principal: Option<String>,
    /// Decision outcome.
    pub outcome: EventOutcome,
}

impl AuthorizationEvent {
    /// Returns `true` for denial events.
    pub fn is_denied(&self) -> bool {
        matches!(self.outcome, EventOutcome::Denied { .. })
    }
}

/// Receives authorization events.
pub trait AuthorizationEventPublisher: Send + Sync {
    /// Publish one event. Must not block.
    fn publish(&self, event: &AuthorizationEvent);
}

/// Publisher that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventPublisher;

impl AuthorizationEventPublisher for NoopEventPublisher {
    fn publish(&self, _event: &AuthorizationEvent) {}
}
