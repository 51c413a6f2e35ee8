//! Interceptor registration
//!
//! The registry collects descriptors per operation and compiles expressions
//! as they are registered, so compile failures are reported at setup. The
//! remaining configuration checks run when `Interceptor::wrap` resolves an
//! operation's plan.

use super::chain::GuardEnvironment;
use super::descriptor::{InterceptorCheck, InterceptorDescriptor};
use super::interceptor::Interceptor;
use super::managers::ExpressionAuthorizationManager;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::debug;
use vigil_core::{
    AuthorizationEventPublisher, AuthorizationManager, ExpressionEngine, FilterExpression,
    IdentityProvider, InterceptionConfig, Invocation, InvocationResult, NoopEventPublisher,
    OperationId, VigilError, VigilResult,
};

/// Builder for an [`Interceptor`].
pub struct InterceptorRegistry {
    engine: Arc<dyn ExpressionEngine>,
    identity: Arc<dyn IdentityProvider>,
    config: InterceptionConfig,
    events: Arc<dyn AuthorizationEventPublisher>,
    descriptors: IndexMap<OperationId, Vec<InterceptorDescriptor>>,
}

impl InterceptorRegistry {
    /// Create an empty registry.
    pub fn new(
        engine: Arc<dyn ExpressionEngine>,
        identity: Arc<dyn IdentityProvider>,
        config: InterceptionConfig,
    ) -> Self {
        Self {
            engine,
            identity,
            config,
            events: Arc::new(NoopEventPublisher),
            descriptors: IndexMap::new(),
        }
    }

    /// Report decisions to `events`.
    pub fn with_event_publisher(mut self, events: Arc<dyn AuthorizationEventPublisher>) -> Self {
        self.events = events;
        self
    }

    /// Active configuration.
    pub fn config(&self) -> &InterceptionConfig {
        &self.config
    }

    /// Compile `text` with the registry's engine.
    ///
    /// Any compile failure is reported as a configuration error.
    pub fn compile(&self, text: &str) -> VigilResult<FilterExpression> {
        self.engine.compile(text).map_err(|err| match err {
            VigilError::Configuration { .. } => err,
            other => VigilError::configuration(format!(
                "expression '{text}' failed to compile: {other}"
            )),
        })
    }

    /// Register a descriptor for `operation`.
    pub fn register(
        &mut self,
        operation: impl Into<OperationId>,
        descriptor: InterceptorDescriptor,
    ) -> &mut Self {
        let operation = operation.into();
        debug!(
            operation = %operation,
            kind = %descriptor.kind(),
            priority = %descriptor.priority(),
            "Registered interceptor"
        );
        self.descriptors
            .entry(operation)
            .or_default()
            .push(descriptor);
        self
    }

    /// Filter the operation's only parameter before the call.
    pub fn pre_filter(
        &mut self,
        operation: impl Into<OperationId>,
        expression: &str,
    ) -> VigilResult<&mut Self> {
        let expression = self.compile(expression)?;
        Ok(self.register(
            operation,
            InterceptorDescriptor::new(InterceptorCheck::PreFilter {
                target: None,
                expression,
                constraint: None,
            }),
        ))
    }

    /// Filter the named parameter before the call.
    ///
    /// Elements failing `constraint` are always kept.
    pub fn pre_filter_target(
        &mut self,
        operation: impl Into<OperationId>,
        target: &str,
        expression: &str,
        constraint: Option<&str>,
    ) -> VigilResult<&mut Self> {
        let expression = self.compile(expression)?;
        let constraint = constraint.map(|text| self.compile(text)).transpose()?;
        Ok(self.register(
            operation,
            InterceptorDescriptor::new(InterceptorCheck::PreFilter {
                target: Some(target.to_string()),
                expression,
                constraint,
            }),
        ))
    }

    /// Require `expression` to hold before the call proceeds.
    pub fn pre_authorize(
        &mut self,
        operation: impl Into<OperationId>,
        expression: &str,
    ) -> VigilResult<&mut Self> {
        let manager = self.expression_manager(expression)?;
        Ok(self.before_call(operation, Arc::new(manager)))
    }

    /// Run `manager` before the call proceeds.
    pub fn before_call(
        &mut self,
        operation: impl Into<OperationId>,
        manager: Arc<dyn AuthorizationManager<Invocation>>,
    ) -> &mut Self {
        self.register(
            operation,
            InterceptorDescriptor::new(InterceptorCheck::BeforeCall(manager)),
        )
    }

    /// Require `expression` to hold for the produced result.
    pub fn post_authorize(
        &mut self,
        operation: impl Into<OperationId>,
        expression: &str,
    ) -> VigilResult<&mut Self> {
        let manager = self.expression_manager(expression)?;
        Ok(self.after_call(operation, Arc::new(manager)))
    }

    /// Run `manager` against the produced result.
    pub fn after_call(
        &mut self,
        operation: impl Into<OperationId>,
        manager: Arc<dyn AuthorizationManager<InvocationResult>>,
    ) -> &mut Self {
        self.register(
            operation,
            InterceptorDescriptor::new(InterceptorCheck::AfterCall(manager)),
        )
    }

    /// Filter the result element-wise.
    pub fn post_filter(
        &mut self,
        operation: impl Into<OperationId>,
        expression: &str,
    ) -> VigilResult<&mut Self> {
        let expression = self.compile(expression)?;
        Ok(self.register(
            operation,
            InterceptorDescriptor::new(InterceptorCheck::PostFilter(expression)),
        ))
    }

    /// Descriptors registered for `operation`, in registration order.
    pub fn descriptors(&self, operation: &OperationId) -> &[InterceptorDescriptor] {
        self.descriptors
            .get(operation)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Freeze the registry into an interceptor.
    pub fn build(self) -> Interceptor {
        let environment = Arc::new(GuardEnvironment {
            engine: self.engine,
            identity: self.identity,
            config: self.config,
            events: self.events,
        });
        Interceptor::new(environment, self.descriptors)
    }

    fn expression_manager(&self, text: &str) -> VigilResult<ExpressionAuthorizationManager> {
        Ok(ExpressionAuthorizationManager::new(
            self.engine.clone(),
            self.compile(text)?,
        ))
    }
}

impl std::fmt::Debug for InterceptorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorRegistry")
            .field("config", &self.config)
            .field("descriptors", &self.descriptors)
            .finish_non_exhaustive()
    }
}
