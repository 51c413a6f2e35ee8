//! Guard chain for protected operations
//!
//! Stage checks compose around every call in a fixed order:
//! PreFilter → BeforeCall → (call) → AfterCall → PostFilter

pub mod adapter;
mod chain;
pub mod descriptor;
pub mod filter;
pub mod interceptor;
pub mod managers;
pub mod registry;
pub mod stream_interceptor;
pub mod sync_interceptor;

pub use adapter::{AsyncReturn, DeferredSequence, ValueStream};
pub use descriptor::{InterceptorCheck, InterceptorDescriptor};
pub use filter::FilterEvaluator;
pub use interceptor::{Handler, Interceptor, Next};
pub use managers::{
    AllOf, AnyOf, AuthorityAuthorizationManager, AuthorizationManagers,
    ExpressionAuthorizationManager,
};
pub use registry::InterceptorRegistry;
pub use stream_interceptor::{StreamInterceptor, StreamingNext};
pub use sync_interceptor::{BlockingNext, CallState, SyncInterceptor};
