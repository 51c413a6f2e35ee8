//! Proptest strategies

use proptest::prelude::*;

/// Short lowercase words, some starting with `a`.
pub fn words() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-e][a-z]{0,6}", 0..24)
}

/// Bounded integers for numeric filters.
pub fn numbers() -> impl Strategy<Value = Vec<i64>> {
    proptest::collection::vec(-500i64..500, 0..32)
}
