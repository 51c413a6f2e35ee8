//! Vigil Core - authorization decision contracts
//!
//! Pure contracts consumed and exposed by the interception engine in
//! `vigil-guards`:
//!
//! - `Decision`, `DenialReason`: outcome of one authorization check
//! - `AuthorizationManager`: produces decisions for invocations and results
//! - `ExpressionEngine`, `FilterExpression`: opaque policy expressions
//! - `IdentityProvider`, `DeferredIdentity`: lazily-resolved caller identity
//! - `Invocation`, `InvocationResult`, `OperationDescriptor`: call model
//! - `InterceptorKind`, `Priority`: interceptor ordering table
//! - `InterceptionConfig`: recognized configuration options
//! - `AuthorizationEvent`: decision reporting

#![forbid(unsafe_code)]

/// Interception configuration
pub mod config;

/// Authorization decisions
pub mod decision;

/// Unified error handling
pub mod errors;

/// Authorization event reporting
pub mod events;

/// Expression engine capability
pub mod expression;

/// Caller identity
pub mod identity;

/// Protected operations and invocations
pub mod invocation;

/// Authorization manager contract
pub mod manager;

/// Interceptor ordering table
pub mod ordering;

pub use config::{DenialDetail, InterceptionConfig};
pub use decision::{Decision, DenialReason};
pub use errors::{UpstreamFailure, VigilError, VigilResult};
pub use events::{AuthorizationEvent, AuthorizationEventPublisher, EventOutcome, NoopEventPublisher};
pub use expression::{CompiledExpression, EvaluationContext, ExpressionEngine, FilterExpression};
pub use identity::{DeferredIdentity, Identity, IdentityProvider, IdentityResolution};
pub use invocation::{
    Cardinality, Invocation, InvocationResult, OperationDescriptor, OperationId, ReturnShape,
};
pub use manager::AuthorizationManager;
pub use ordering::{order_by_priority, InterceptorKind, Priority};

/// Dynamic value carried by arguments, results and stream elements.
pub use serde_json::Value;
