//! Shared fixtures: identities, expressions and sample data

use crate::engine::PredicateEngine;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vigil_core::Identity;

/// Sample stream elements.
pub const FRUITS: [&str; 4] = ["apple", "banana", "aubergine", "orange"];

/// Keeps string elements starting with `a`.
pub const STARTS_WITH_A: &str = "filterObject.startsWith('a')";

/// Keeps elements whose `owner` is the caller.
pub const OWNED_BY_CALLER: &str = "filterObject.owner == principal";

/// Grants when the returned value's `owner` is the caller.
pub const RETURNS_OWN_RECORD: &str = "returnObject.owner == principal";

/// Grants when the first argument is positive.
pub const POSITIVE_AMOUNT: &str = "#amount > 0";

/// Holder of role `A` and authority `docs:read`.
pub fn anne() -> Identity {
    Identity::new("anne")
        .with_role("A")
        .with_authority("docs:read")
}

/// Holder of role `B`.
pub fn bob() -> Identity {
    Identity::new("bob").with_role("B")
}

/// Standard engine plus the fixture expressions above.
pub fn fixture_engine() -> PredicateEngine {
    PredicateEngine::standard()
        .with(STARTS_WITH_A, |ctx| {
            Ok(ctx
                .filter_object()
                .and_then(Value::as_str)
                .is_some_and(|text| text.starts_with('a')))
        })
        .with(OWNED_BY_CALLER, |ctx| {
            Ok(ctx
                .filter_object()
                .and_then(|element| element.get("owner"))
                .and_then(Value::as_str)
                == Some(ctx.identity().principal()))
        })
        .with(RETURNS_OWN_RECORD, |ctx| {
            Ok(ctx
                .return_object()
                .and_then(|record| record.get("owner"))
                .and_then(Value::as_str)
                == Some(ctx.identity().principal()))
        })
        .with(POSITIVE_AMOUNT, |ctx| {
            let amount = ctx.argument("amount").and_then(Value::as_i64).ok_or_else(|| {
                vigil_core::VigilError::evaluation("argument 'amount' is not a number")
            })?;
            Ok(amount > 0)
        })
}

/// String values as JSON.
pub fn strings(items: &[&str]) -> Vec<Value> {
    items.iter().map(|item| json!(item)).collect()
}

/// Counts invocations of an underlying operation.
#[derive(Debug, Clone, Default)]
pub struct CallCounter {
    calls: Arc<AtomicUsize>,
}

impl CallCounter {
    /// Create a zeroed counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call.
    pub fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    /// Calls recorded so far.
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}
