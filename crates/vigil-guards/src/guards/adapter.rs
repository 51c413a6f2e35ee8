//! Asynchronous return shapes and the deferred sequence
//!
//! Every asynchronous result is normalized into a `DeferredSequence` so the
//! stream interceptor has one code path:
//!
//! - `Deferred` becomes a sequence of zero or one element
//! - `Suspended` becomes a sequence of exactly one element
//! - `Stream` is used as is; under single cardinality only its first element
//!   is taken
//!
//! `into_return` converts back to the declared shape. Streams stay pull
//! based throughout, so backpressure and cancellation reach the upstream.

use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use vigil_core::{Cardinality, ReturnShape, VigilError, VigilResult};

/// Boxed stream of elements or failures.
pub type ValueStream = BoxStream<'static, VigilResult<Value>>;

/// Result of an asynchronous protected operation.
pub enum AsyncReturn {
    /// A value that may complete empty.
    Deferred(BoxFuture<'static, VigilResult<Option<Value>>>),
    /// A computation that yields exactly one value.
    Suspended(BoxFuture<'static, VigilResult<Value>>),
    /// Any number of values over time.
    Stream(ValueStream),
}

impl AsyncReturn {
    /// Wrap a deferred value.
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = VigilResult<Option<Value>>> + Send + 'static,
    {
        Self::Deferred(future.boxed())
    }

    /// Wrap a suspended computation.
    pub fn suspended<F>(future: F) -> Self
    where
        F: Future<Output = VigilResult<Value>> + Send + 'static,
    {
        Self::Suspended(future.boxed())
    }

    /// Wrap a stream.
    pub fn stream<S>(elements: S) -> Self
    where
        S: Stream<Item = VigilResult<Value>> + Send + 'static,
    {
        Self::Stream(elements.boxed())
    }

    /// Shape of this return value.
    pub fn shape(&self) -> ReturnShape {
        match self {
            AsyncReturn::Deferred(_) => ReturnShape::Deferred,
            AsyncReturn::Suspended(_) => ReturnShape::Suspended,
            AsyncReturn::Stream(_) => ReturnShape::Stream,
        }
    }

    /// Drive to completion and gather every element.
    pub async fn collect(self) -> VigilResult<Vec<Value>> {
        match self {
            AsyncReturn::Deferred(value) => Ok(value.await?.into_iter().collect()),
            AsyncReturn::Suspended(value) => Ok(vec![value.await?]),
            AsyncReturn::Stream(elements) => elements.try_collect().await,
        }
    }
}

impl fmt::Debug for AsyncReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AsyncReturn").field(&self.shape()).finish()
    }
}

/// Normalized asynchronous result with a declared cardinality.
pub struct DeferredSequence {
    cardinality: Cardinality,
    elements: ValueStream,
}

impl DeferredSequence {
    /// Normalize an asynchronous return value.
    pub fn adapt(value: AsyncReturn, cardinality: Cardinality) -> Self {
        let elements = match value {
            AsyncReturn::Deferred(value) => value
                .map(Result::transpose)
                .into_stream()
                .filter_map(future::ready)
                .boxed(),
            AsyncReturn::Suspended(value) => value.into_stream().boxed(),
            AsyncReturn::Stream(elements) => match cardinality {
                Cardinality::Single => elements.take(1).boxed(),
                Cardinality::Multi => elements,
            },
        };
        Self {
            cardinality,
            elements,
        }
    }

    /// A sequence that fails immediately.
    pub fn failed(cardinality: Cardinality, err: VigilError) -> Self {
        Self {
            cardinality,
            elements: stream::once(future::ready(Err(err))).boxed(),
        }
    }

    /// Wrap an already normalized element stream.
    pub fn from_elements(cardinality: Cardinality, elements: ValueStream) -> Self {
        Self {
            cardinality,
            elements,
        }
    }

    /// Declared cardinality.
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// The element stream.
    pub fn into_elements(self) -> ValueStream {
        self.elements
    }

    /// Convert back to the caller-facing shape.
    ///
    /// Only `Stream` stays multi-valued; every other shape, including an
    /// undeclared `Publisher`, yields the first element. A `Suspended`
    /// result whose element was removed yields `Value::Null`.
    pub fn into_return(self, shape: ReturnShape) -> AsyncReturn {
        let mut elements = self.elements;
        match shape {
            ReturnShape::Stream => AsyncReturn::Stream(elements),
            ReturnShape::Suspended => AsyncReturn::suspended(async move {
                Ok(elements.next().await.transpose()?.unwrap_or(Value::Null))
            }),
            _ => AsyncReturn::deferred(async move { elements.next().await.transpose() }),
        }
    }
}

impl fmt::Debug for DeferredSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredSequence")
            .field("cardinality", &self.cardinality)
            .finish_non_exhaustive()
    }
}
