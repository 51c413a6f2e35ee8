//! Element-wise filter evaluation
//!
//! `FilterEvaluator` decides keep/drop for one element at a time. Each call is
//! independent of every other element, so sequence order is preserved and an
//! element's verdict never depends on the elements after it.
//!
//! Maps are filtered entry by entry; each entry is presented to the
//! expression as `{"key": k, "value": v}`.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;
use vigil_core::{
    DeferredIdentity, EvaluationContext, ExpressionEngine, FilterExpression, Identity,
    InterceptorKind, Invocation, VigilError, VigilResult,
};

/// Rewrap an engine failure so it names the expression that failed.
///
/// Denials and upstream failures pass through unchanged.
pub(crate) fn evaluation_failure(expression: &FilterExpression, err: VigilError) -> VigilError {
    match err {
        VigilError::Evaluation { message } | VigilError::Configuration { message } => {
            VigilError::evaluation(format!("failed to evaluate '{expression}': {message}"))
        }
        other => other,
    }
}

/// Keep/drop verdicts for single elements.
#[derive(Clone)]
pub struct FilterEvaluator {
    engine: Arc<dyn ExpressionEngine>,
    stage: InterceptorKind,
}

impl FilterEvaluator {
    /// Create an evaluator reporting denials at `stage`.
    pub fn new(engine: Arc<dyn ExpressionEngine>, stage: InterceptorKind) -> Self {
        Self { engine, stage }
    }

    /// Stage this evaluator runs at.
    pub fn stage(&self) -> InterceptorKind {
        self.stage
    }

    /// Returns `true` if `element` passes `expression`.
    pub fn keep(
        &self,
        identity: &DeferredIdentity,
        element: &Value,
        expression: &FilterExpression,
        invocation: &Invocation,
    ) -> VigilResult<bool> {
        self.keep_constrained(identity, element, expression, None, invocation)
    }

    /// Like [`keep`](Self::keep), but elements failing `constraint` are kept
    /// without evaluating `expression`.
    pub fn keep_constrained(
        &self,
        identity: &DeferredIdentity,
        element: &Value,
        expression: &FilterExpression,
        constraint: Option<&FilterExpression>,
        invocation: &Invocation,
    ) -> VigilResult<bool> {
        let resolved = self.require_identity(identity)?;
        self.judge(&resolved, element, expression, constraint, invocation)
    }

    /// Filter a sequence or map value, preserving order.
    ///
    /// `Null` passes through unchanged; any other value cannot be filtered.
    pub fn filter_value(
        &self,
        identity: &DeferredIdentity,
        value: Value,
        expression: &FilterExpression,
        constraint: Option<&FilterExpression>,
        invocation: &Invocation,
    ) -> VigilResult<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Array(elements) if elements.is_empty() => Ok(Value::Array(elements)),
            Value::Object(entries) if entries.is_empty() => Ok(Value::Object(entries)),
            Value::Array(elements) => {
                let resolved = self.require_identity(identity)?;
                let total = elements.len();
                let mut kept = Vec::with_capacity(total);
                for element in elements {
                    if self.judge(&resolved, &element, expression, constraint, invocation)? {
                        kept.push(element);
                    }
                }
                debug!(
                    stage = %self.stage,
                    expression = %expression,
                    total,
                    kept = kept.len(),
                    "Filtered sequence"
                );
                Ok(Value::Array(kept))
            }
            Value::Object(entries) => {
                let resolved = self.require_identity(identity)?;
                let total = entries.len();
                let mut kept = Map::new();
                for (key, value) in entries {
                    let entry = json!({ "key": &key, "value": &value });
                    if self.judge(&resolved, &entry, expression, constraint, invocation)? {
                        kept.insert(key, value);
                    }
                }
                debug!(
                    stage = %self.stage,
                    expression = %expression,
                    total,
                    kept = kept.len(),
                    "Filtered map"
                );
                Ok(Value::Object(kept))
            }
            other => Err(VigilError::evaluation(format!(
                "{} cannot filter a {} value; expected a sequence or map",
                self.stage,
                value_kind(&other)
            ))),
        }
    }

    fn require_identity(&self, identity: &DeferredIdentity) -> VigilResult<Arc<Identity>> {
        identity
            .require_blocking()?
            .map_err(|reason| VigilError::denied(self.stage, reason))
    }

    fn judge(
        &self,
        identity: &Identity,
        element: &Value,
        expression: &FilterExpression,
        constraint: Option<&FilterExpression>,
        invocation: &Invocation,
    ) -> VigilResult<bool> {
        let context =
            EvaluationContext::for_invocation(identity, invocation).with_filter_object(element);
        if let Some(constraint) = constraint {
            if !self.evaluate(constraint, &context)? {
                return Ok(true);
            }
        }
        self.evaluate(expression, &context)
    }

    fn evaluate(
        &self,
        expression: &FilterExpression,
        context: &EvaluationContext<'_>,
    ) -> VigilResult<bool> {
        self.engine
            .evaluate_boolean(expression, context)
            .map_err(|e| evaluation_failure(expression, e))
    }
}

impl std::fmt::Debug for FilterEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterEvaluator")
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use vigil_core::{DenialReason, OperationDescriptor, ReturnShape};
    use vigil_testkit::PredicateEngine;

    const NOT_MULTIPLE_OF_THREE: &str = "filterObject % 3 != 0";

    fn engine() -> Arc<PredicateEngine> {
        Arc::new(
            PredicateEngine::standard()
                .with(NOT_MULTIPLE_OF_THREE, |ctx| {
                    Ok(ctx
                        .filter_object()
                        .and_then(Value::as_i64)
                        .is_some_and(|n| n % 3 != 0))
                })
                .with("filterObject.value > 1", |ctx| {
                    Ok(ctx
                        .filter_object()
                        .and_then(|entry| entry.get("value"))
                        .and_then(Value::as_i64)
                        .is_some_and(|n| n > 1))
                })
                .with("filterObject.owner == principal", |ctx| {
                    Ok(ctx
                        .filter_object()
                        .and_then(|doc| doc.get("owner"))
                        .and_then(Value::as_str)
                        == Some(ctx.identity().principal()))
                })
                .with("filterObject.shared", |ctx| {
                    Ok(ctx
                        .filter_object()
                        .and_then(|doc| doc.get("shared"))
                        .and_then(Value::as_bool)
                        .unwrap_or(false))
                })
                .with("filterObject.missing", |_| {
                    Err(VigilError::evaluation("no such property 'missing'"))
                }),
        )
    }

    fn evaluator() -> (FilterEvaluator, Arc<PredicateEngine>) {
        let engine = engine();
        (
            FilterEvaluator::new(engine.clone(), InterceptorKind::PreFilter),
            engine,
        )
    }

    fn invocation() -> Invocation {
        Invocation::new(
            Arc::new(
                OperationDescriptor::new("list_numbers", ReturnShape::Sequence)
                    .with_parameter("numbers"),
            ),
            vec![],
        )
    }

    fn anne() -> DeferredIdentity {
        DeferredIdentity::of(Identity::new("anne").with_role("A"))
    }

    fn compile(engine: &PredicateEngine, text: &str) -> FilterExpression {
        engine.compile(text).unwrap()
    }

    #[test]
    fn filters_sequences_in_order() {
        let (evaluator, engine) = evaluator();
        let expression = compile(&engine, NOT_MULTIPLE_OF_THREE);
        let filtered = evaluator
            .filter_value(&anne(), json!([1, 2, 3, 4, 6, 7]), &expression, None, &invocation())
            .unwrap();
        assert_eq!(filtered, json!([1, 2, 4, 7]));
    }

    #[test]
    fn filters_map_entries() {
        let (evaluator, engine) = evaluator();
        let expression = compile(&engine, "filterObject.value > 1");
        let filtered = evaluator
            .filter_value(
                &anne(),
                json!({"a": 1, "b": 2, "c": 3}),
                &expression,
                None,
                &invocation(),
            )
            .unwrap();
        assert_eq!(filtered, json!({"b": 2, "c": 3}));
    }

    #[test]
    fn constraint_protects_unjudged_elements() {
        let (evaluator, engine) = evaluator();
        let owned = compile(&engine, "filterObject.owner == principal");
        let shared = compile(&engine, "filterObject.shared");
        let documents = json!([
            {"owner": "anne", "shared": true},
            {"owner": "bob", "shared": true},
            {"owner": "bob", "shared": false},
        ]);

        let filtered = evaluator
            .filter_value(&anne(), documents, &owned, Some(&shared), &invocation())
            .unwrap();
        assert_eq!(
            filtered,
            json!([
                {"owner": "anne", "shared": true},
                {"owner": "bob", "shared": false},
            ])
        );
    }

    #[test]
    fn null_passes_through_and_scalars_fail() {
        let (evaluator, engine) = evaluator();
        let expression = compile(&engine, NOT_MULTIPLE_OF_THREE);
        assert_eq!(
            evaluator
                .filter_value(&anne(), Value::Null, &expression, None, &invocation())
                .unwrap(),
            Value::Null
        );
        let err = evaluator
            .filter_value(&anne(), json!(42), &expression, None, &invocation())
            .unwrap_err();
        assert!(err.is_evaluation());
        assert!(err.to_string().contains("number"));
    }

    #[test]
    fn missing_identity_is_a_denial_at_the_stage() {
        let (evaluator, engine) = evaluator();
        let expression = compile(&engine, NOT_MULTIPLE_OF_THREE);
        let err = evaluator
            .keep(&DeferredIdentity::absent(), &json!(1), &expression, &invocation())
            .unwrap_err();
        assert_matches!(
            err,
            VigilError::Denied {
                stage: InterceptorKind::PreFilter,
                reason: DenialReason::AuthenticationRequired,
            }
        );
    }

    #[test]
    fn evaluation_failures_name_the_expression() {
        let (evaluator, engine) = evaluator();
        let expression = compile(&engine, "filterObject.missing");
        let err = evaluator
            .keep(&anne(), &json!({}), &expression, &invocation())
            .unwrap_err();
        assert!(err.is_evaluation());
        assert!(err.to_string().contains("filterObject.missing"));
    }

    #[test]
    fn empty_sequences_skip_identity_resolution() {
        let (evaluator, engine) = evaluator();
        let expression = compile(&engine, NOT_MULTIPLE_OF_THREE);
        let filtered = evaluator
            .filter_value(&DeferredIdentity::absent(), json!([]), &expression, None, &invocation())
            .unwrap();
        assert_eq!(filtered, json!([]));
        assert_eq!(engine.evaluations(), 0);
    }

    proptest! {
        #[test]
        fn filtering_keeps_exactly_the_passing_elements_in_order(
            numbers in proptest::collection::vec(-1000i64..1000, 0..40)
        ) {
            let (evaluator, engine) = evaluator();
            let expression = compile(&engine, NOT_MULTIPLE_OF_THREE);
            let filtered = evaluator
                .filter_value(&anne(), json!(numbers.clone()), &expression, None, &invocation())
                .unwrap();
            let expected: Vec<i64> = numbers.iter().copied().filter(|n| n % 3 != 0).collect();
            prop_assert_eq!(filtered, json!(expected));
            prop_assert_eq!(engine.evaluations(), numbers.len());
        }

        #[test]
        fn filtering_twice_is_idempotent(
            numbers in proptest::collection::vec(-1000i64..1000, 0..40)
        ) {
            let (evaluator, engine) = evaluator();
            let expression = compile(&engine, NOT_MULTIPLE_OF_THREE);
            let once = evaluator
                .filter_value(&anne(), json!(numbers), &expression, None, &invocation())
                .unwrap();
            let twice = evaluator
                .filter_value(&anne(), once.clone(), &expression, None, &invocation())
                .unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
