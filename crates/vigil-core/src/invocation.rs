//! Protected operations and their invocations

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Typed identifier for a protected operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Create a new operation identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for OperationId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for OperationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a result is declared single- or multi-valued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// At most one value.
    Single,
    /// Any number of values over time.
    Multi,
}

/// Declared return shape of a protected operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnShape {
    /// Blocking call returning one non-sequence value.
    Scalar,
    /// Blocking call returning an array.
    Sequence,
    /// Blocking call returning an object whose entries can be filtered.
    Map,
    /// Asynchronous value that may complete empty.
    Deferred,
    /// Suspended computation that yields exactly one value.
    Suspended,
    /// Asynchronous sequence of values.
    Stream,
    /// Asynchronous source whose cardinality is not declared.
    Publisher,
}

impl ReturnShape {
    /// Returns `true` for shapes produced without blocking the caller.
    pub fn is_async(self) -> bool {
        matches!(
            self,
            ReturnShape::Deferred
                | ReturnShape::Suspended
                | ReturnShape::Stream
                | ReturnShape::Publisher
        )
    }

    /// Declared cardinality, `None` when it cannot be determined from the shape.
    pub fn cardinality(self) -> Option<Cardinality> {
        match self {
            ReturnShape::Scalar
            | ReturnShape::Sequence
            | ReturnShape::Map
            | ReturnShape::Deferred
            | ReturnShape::Suspended => Some(Cardinality::Single),
            ReturnShape::Stream => Some(Cardinality::Multi),
            ReturnShape::Publisher => None,
        }
    }

    /// Returns `true` if a post-filter can be attached to this shape.
    pub fn supports_post_filter(self) -> bool {
        !matches!(self, ReturnShape::Scalar)
    }
}

impl fmt::Display for ReturnShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReturnShape::Scalar => "scalar",
            ReturnShape::Sequence => "sequence",
            ReturnShape::Map => "map",
            ReturnShape::Deferred => "deferred",
            ReturnShape::Suspended => "suspended",
            ReturnShape::Stream => "stream",
            ReturnShape::Publisher => "publisher",
        };
        f.write_str(name)
    }
}

/// Signature of a protected operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    id: OperationId,
    parameters: Vec<String>,
    return_shape: ReturnShape,
}

impl OperationDescriptor {
    /// Create a descriptor with no parameters.
    pub fn new(id: impl Into<OperationId>, return_shape: ReturnShape) -> Self {
        Self {
            id: id.into(),
            parameters: Vec::new(),
            return_shape,
        }
    }

    /// Append a named parameter.
    pub fn with_parameter(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(name.into());
        self
    }

    /// Operation identifier.
    pub fn id(&self) -> &OperationId {
        &self.id
    }

    /// Ordered parameter names.
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Position of a named parameter.
    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|param| param == name)
    }

    /// Declared return shape.
    pub fn return_shape(&self) -> ReturnShape {
        self.return_shape
    }
}

/// One call to a protected operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    operation: Arc<OperationDescriptor>,
    arguments: Vec<Value>,
}

impl Invocation {
    /// Create an invocation.
    pub fn new(operation: Arc<OperationDescriptor>, arguments: Vec<Value>) -> Self {
        Self {
            operation,
            arguments,
        }
    }

    /// The operation being called.
    pub fn operation(&self) -> &OperationDescriptor {
        &self.operation
    }

    /// Ordered argument values.
    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    /// Argument by position.
    pub fn argument(&self, index: usize) -> Option<&Value> {
        self.arguments.get(index)
    }

    /// Argument by parameter name.
    pub fn named_argument(&self, name: &str) -> Option<&Value> {
        self.operation
            .parameter_index(name)
            .and_then(|index| self.arguments.get(index))
    }

    /// Replace an argument with its rewritten form.
    ///
    /// Only the pre-filter stage rewrites arguments.
    pub fn replace_argument(&mut self, index: usize, value: Value) -> Option<Value> {
        self.arguments
            .get_mut(index)
            .map(|slot| std::mem::replace(slot, value))
    }

    /// Consume the invocation, returning its arguments.
    pub fn into_arguments(self) -> Vec<Value> {
        self.arguments
    }
}

/// An invocation paired with the value it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResult {
    invocation: Arc<Invocation>,
    result: Value,
}

impl InvocationResult {
    /// Pair an invocation with its result.
    pub fn new(invocation: Arc<Invocation>, result: Value) -> Self {
        Self { invocation, result }
    }

    /// The originating invocation.
    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    /// The produced value.
    pub fn result(&self) -> &Value {
        &self.result
    }

    /// Hand the produced value back unchanged.
    pub fn into_result(self) -> Value {
        self.result
    }
}
