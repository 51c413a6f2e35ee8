//! Interceptor descriptors
//!
//! A descriptor pairs one check with an optional explicit priority. Its kind
//! is derived from the check, so a descriptor can never be filed under the
//! wrong stage.

use std::fmt;
use std::sync::Arc;
use vigil_core::{
    AuthorizationManager, FilterExpression, InterceptorKind, Invocation, InvocationResult,
    Priority,
};

/// The check a descriptor applies.
#[derive(Clone)]
pub enum InterceptorCheck {
    /// Filter one argument before the call.
    PreFilter {
        /// Parameter name; may be omitted when the operation has exactly one parameter
        target: Option<String>,
        /// Keep predicate
        expression: FilterExpression,
        /// Elements failing this are kept without evaluating `expression`
        constraint: Option<FilterExpression>,
    },
    /// Decide on the invocation before it proceeds.
    BeforeCall(Arc<dyn AuthorizationManager<Invocation>>),
    /// Decide on the produced result.
    AfterCall(Arc<dyn AuthorizationManager<InvocationResult>>),
    /// Filter the result element-wise.
    PostFilter(FilterExpression),
}

impl InterceptorCheck {
    /// Stage this check runs at.
    pub fn kind(&self) -> InterceptorKind {
        match self {
            InterceptorCheck::PreFilter { .. } => InterceptorKind::PreFilter,
            InterceptorCheck::BeforeCall(_) => InterceptorKind::BeforeCall,
            InterceptorCheck::AfterCall(_) => InterceptorKind::AfterCall,
            InterceptorCheck::PostFilter(_) => InterceptorKind::PostFilter,
        }
    }
}

impl fmt::Debug for InterceptorCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterceptorCheck::PreFilter {
                target,
                expression,
                constraint,
            } => f
                .debug_struct("PreFilter")
                .field("target", target)
                .field("expression", expression)
                .field("constraint", constraint)
                .finish(),
            InterceptorCheck::BeforeCall(manager) => {
                f.debug_tuple("BeforeCall").field(&manager.name()).finish()
            }
            InterceptorCheck::AfterCall(manager) => {
                f.debug_tuple("AfterCall").field(&manager.name()).finish()
            }
            InterceptorCheck::PostFilter(expression) => {
                f.debug_tuple("PostFilter").field(expression).finish()
            }
        }
    }
}

/// One configured check for a protected operation.
#[derive(Debug, Clone)]
pub struct InterceptorDescriptor {
    check: InterceptorCheck,
    priority: Option<Priority>,
}

impl InterceptorDescriptor {
    /// Descriptor running at the default priority for its kind.
    pub fn new(check: InterceptorCheck) -> Self {
        Self {
            check,
            priority: None,
        }
    }

    /// Override the default priority.
    pub fn with_priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    /// Stage kind, derived from the check.
    pub fn kind(&self) -> InterceptorKind {
        self.check.kind()
    }

    /// Effective priority.
    pub fn priority(&self) -> Priority {
        self.priority
            .unwrap_or_else(|| self.kind().default_priority())
    }

    /// Returns `true` if the priority was set explicitly.
    pub fn has_explicit_priority(&self) -> bool {
        self.priority.is_some()
    }

    /// The configured check.
    pub fn check(&self) -> &InterceptorCheck {
        &self.check
    }
}
