//! Expression engine capability
//!
//! The interception core never parses or inspects expressions. An
//! `ExpressionEngine` compiles source text into an opaque `FilterExpression`
//! and evaluates it against an `EvaluationContext`.

use crate::errors::VigilResult;
use crate::identity::Identity;
use crate::invocation::{Invocation, OperationDescriptor};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Bindings visible to an expression during evaluation.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    identity: &'a Identity,
    invocation: &'a Invocation,
    return_object: Option<&'a Value>,
    filter_object: Option<&'a Value>,
}

impl<'a> EvaluationContext<'a> {
    /// Context for checks on the invocation itself.
    pub fn for_invocation(identity: &'a Identity, invocation: &'a Invocation) -> Self {
        Self {
            identity,
            invocation,
            return_object: None,
            filter_object: None,
        }
    }

    /// Bind the value returned by the call.
    pub fn with_return_object(mut self, value: &'a Value) -> Self {
        self.return_object = Some(value);
        self
    }

    /// Bind the element currently being filtered.
    pub fn with_filter_object(mut self, value: &'a Value) -> Self {
        self.filter_object = Some(value);
        self
    }

    /// Resolved caller identity.
    pub fn identity(&self) -> &'a Identity {
        self.identity
    }

    /// The intercepted invocation.
    pub fn invocation(&self) -> &'a Invocation {
        self.invocation
    }

    /// The intercepted operation.
    pub fn operation(&self) -> &'a OperationDescriptor {
        self.invocation.operation()
    }

    /// Argument by parameter name.
    pub fn argument(&self, name: &str) -> Option<&'a Value> {
        self.invocation.named_argument(name)
    }

    /// Value returned by the call, for after-call checks.
    pub fn return_object(&self) -> Option<&'a Value> {
        self.return_object
    }

    /// Element under evaluation, for filters.
    pub fn filter_object(&self) -> Option<&'a Value> {
        self.filter_object
    }
}

/// Engine-specific compiled form of an expression.
pub trait CompiledExpression: Send + Sync + fmt::Debug {
    /// Evaluate to a boolean.
    fn evaluate(&self, context: &EvaluationContext<'_>) -> VigilResult<bool>;
}

/// Opaque compiled predicate, immutable once compiled.
#[derive(Clone)]
pub struct FilterExpression {
    source: Arc<str>,
    compiled: Arc<dyn CompiledExpression>,
}

impl FilterExpression {
    /// Wrap an engine's compiled form together with its source text.
    pub fn new(source: impl Into<Arc<str>>, compiled: Arc<dyn CompiledExpression>) -> Self {
        Self {
            source: source.into(),
            compiled,
        }
    }

    /// Source text, for logging and denial detail.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Engine-specific compiled form.
    pub fn compiled(&self) -> &dyn CompiledExpression {
        self.compiled.as_ref()
    }
}

impl fmt::Debug for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FilterExpression").field(&self.source).finish()
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Compiles and evaluates policy expressions.
pub trait ExpressionEngine: Send + Sync {
    /// Compile source text.
    ///
    /// Failures should be reported as `VigilError::Configuration`.
    fn compile(&self, text: &str) -> VigilResult<FilterExpression>;

    /// Evaluate a compiled expression to a boolean.
    ///
    /// Failures should be reported as `VigilError::Evaluation`.
    fn evaluate_boolean(
        &self,
        expression: &FilterExpression,
        context: &EvaluationContext<'_>,
    ) -> VigilResult<bool> {
        expression.compiled().evaluate(context)
    }
}
