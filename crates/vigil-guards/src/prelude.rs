//! Vigil Guards prelude.
//!
//! Curated re-exports for registering checks and wrapping operations.

pub use crate::guards::{
    AsyncReturn, AuthorityAuthorizationManager, AuthorizationManagers,
    ExpressionAuthorizationManager, Handler, Interceptor, InterceptorRegistry, Next,
    StreamInterceptor, SyncInterceptor,
};
pub use vigil_core::{
    AuthorizationManager, Decision, DeferredIdentity, DenialReason, Identity, IdentityProvider,
    InterceptionConfig, Invocation, InvocationResult, OperationDescriptor, ReturnShape, Value,
    VigilError, VigilResult,
};
