//! Interceptor capability
//!
//! An `Interceptor` is the immutable result of `InterceptorRegistry::build`.
//! Wrapping an operation resolves its stage plan, so every configuration
//! error is reported by `wrap` and never by a call.

use super::adapter::AsyncReturn;
use super::chain::{GuardEnvironment, StagePlan};
use super::descriptor::InterceptorDescriptor;
use super::stream_interceptor::{StreamInterceptor, StreamingNext};
use super::sync_interceptor::{BlockingNext, SyncInterceptor};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use vigil_core::{Invocation, OperationDescriptor, OperationId, VigilError, VigilResult};

/// The next step in the call chain: the protected operation itself.
#[derive(Clone)]
pub enum Next {
    /// Blocking operation.
    Blocking(BlockingNext),
    /// Asynchronous operation.
    Streaming(StreamingNext),
}

impl Next {
    /// Wrap a blocking operation.
    pub fn blocking<F>(operation: F) -> Self
    where
        F: Fn(&Invocation) -> VigilResult<Value> + Send + Sync + 'static,
    {
        Self::Blocking(Arc::new(operation))
    }

    /// Wrap an asynchronous operation.
    pub fn streaming<F>(operation: F) -> Self
    where
        F: Fn(&Invocation) -> AsyncReturn + Send + Sync + 'static,
    {
        Self::Streaming(Arc::new(operation))
    }
}

/// Invocation handler returned by [`Interceptor::wrap`].
#[derive(Debug, Clone)]
pub enum Handler {
    /// Handler for a blocking operation.
    Blocking(SyncInterceptor),
    /// Handler for an asynchronous operation.
    Streaming(StreamInterceptor),
}

/// Wraps protected operations with their configured checks.
#[derive(Clone)]
pub struct Interceptor {
    inner: Arc<InterceptorInner>,
}

struct InterceptorInner {
    environment: Arc<GuardEnvironment>,
    descriptors: IndexMap<OperationId, Vec<InterceptorDescriptor>>,
}

impl Interceptor {
    pub(crate) fn new(
        environment: Arc<GuardEnvironment>,
        descriptors: IndexMap<OperationId, Vec<InterceptorDescriptor>>,
    ) -> Self {
        Self {
            inner: Arc::new(InterceptorInner {
                environment,
                descriptors,
            }),
        }
    }

    /// Wrap `operation`, choosing the execution model from `next`.
    ///
    /// `next` must match the declared return shape: blocking shapes take
    /// `Next::Blocking`, asynchronous shapes take `Next::Streaming`.
    pub fn wrap(&self, operation: OperationDescriptor, next: Next) -> VigilResult<Handler> {
        match next {
            Next::Blocking(next) => Ok(Handler::Blocking(self.blocking(operation, next)?)),
            Next::Streaming(next) => Ok(Handler::Streaming(self.streaming(operation, next)?)),
        }
    }

    /// Wrap a blocking operation.
    pub fn wrap_blocking<F>(
        &self,
        operation: OperationDescriptor,
        next: F,
    ) -> VigilResult<SyncInterceptor>
    where
        F: Fn(&Invocation) -> VigilResult<Value> + Send + Sync + 'static,
    {
        self.blocking(operation, Arc::new(next))
    }

    /// Wrap an asynchronous operation.
    pub fn wrap_streaming<F>(
        &self,
        operation: OperationDescriptor,
        next: F,
    ) -> VigilResult<StreamInterceptor>
    where
        F: Fn(&Invocation) -> AsyncReturn + Send + Sync + 'static,
    {
        self.streaming(operation, Arc::new(next))
    }

    /// Returns `true` if any check is registered for `operation`.
    pub fn is_protected(&self, operation: &OperationId) -> bool {
        self.inner
            .descriptors
            .get(operation)
            .is_some_and(|descriptors| !descriptors.is_empty())
    }

    /// Operations with registered checks, in registration order.
    pub fn operations(&self) -> impl Iterator<Item = &OperationId> {
        self.inner.descriptors.keys()
    }

    fn blocking(
        &self,
        operation: OperationDescriptor,
        next: BlockingNext,
    ) -> VigilResult<SyncInterceptor> {
        if operation.return_shape().is_async() {
            return Err(VigilError::configuration(format!(
                "'{}' returns a {} result and cannot be wrapped as a blocking call",
                operation.id(),
                operation.return_shape()
            )));
        }
        let plan = self.plan(operation)?;
        Ok(SyncInterceptor::new(plan, next))
    }

    fn streaming(
        &self,
        operation: OperationDescriptor,
        next: StreamingNext,
    ) -> VigilResult<StreamInterceptor> {
        if !operation.return_shape().is_async() {
            return Err(VigilError::configuration(format!(
                "'{}' returns a {} result and cannot be wrapped as a streaming call",
                operation.id(),
                operation.return_shape()
            )));
        }
        let plan = self.plan(operation)?;
        Ok(StreamInterceptor::new(plan, next))
    }

    fn plan(&self, operation: OperationDescriptor) -> VigilResult<Arc<StagePlan>> {
        let descriptors = self
            .inner
            .descriptors
            .get(operation.id())
            .map(Vec::as_slice)
            .unwrap_or_default();
        if descriptors.is_empty() {
            debug!(operation = %operation.id(), "No checks registered; wrapping as pass-through");
        }
        StagePlan::resolve(self.inner.environment.clone(), operation, descriptors).map(Arc::new)
    }
}

impl std::fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interceptor")
            .field("operations", &self.inner.descriptors.len())
            .field("config", &self.inner.environment.config)
            .finish_non_exhaustive()
    }
}
