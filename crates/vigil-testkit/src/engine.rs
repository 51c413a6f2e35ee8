//! Closure-backed expression engine
//!
//! Expressions are either registered verbatim with [`PredicateEngine::with`]
//! or one of the built-in forms understood by [`PredicateEngine::standard`]:
//!
//! - `permitAll`, `denyAll`, `isAuthenticated()`
//! - `hasRole('A')`, `hasAnyRole('A', 'B')`
//! - `hasAuthority('docs:read')`, `hasAnyAuthority('docs:read', 'docs:write')`
//!
//! Unknown text fails to compile with a configuration error. Every
//! evaluation is counted.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vigil_core::{
    CompiledExpression, EvaluationContext, ExpressionEngine, FilterExpression, VigilError,
    VigilResult,
};

type Predicate = Arc<dyn Fn(&EvaluationContext<'_>) -> VigilResult<bool> + Send + Sync>;

/// Expression engine for tests.
#[derive(Clone, Default)]
pub struct PredicateEngine {
    predicates: HashMap<String, Predicate>,
    builtins: bool,
    evaluations: Arc<AtomicUsize>,
}

impl PredicateEngine {
    /// Engine that knows only registered expressions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine that also understands the built-in forms.
    pub fn standard() -> Self {
        Self {
            builtins: true,
            ..Self::default()
        }
    }

    /// Register `text` as an expression evaluated by `predicate`.
    pub fn with<F>(mut self, text: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&EvaluationContext<'_>) -> VigilResult<bool> + Send + Sync + 'static,
    {
        self.predicates.insert(text.into(), Arc::new(predicate));
        self
    }

    /// Evaluations performed so far, across every compiled expression.
    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    /// Shared handle to the evaluation counter.
    pub fn evaluation_counter(&self) -> Arc<AtomicUsize> {
        self.evaluations.clone()
    }

    fn builtin(text: &str) -> Option<Predicate> {
        let text = text.trim();
        match text {
            "permitAll" | "isAuthenticated()" => return Some(constant(true)),
            "denyAll" => return Some(constant(false)),
            _ => {}
        }

        let (name, arguments) = parse_call(text)?;
        match name {
            "hasRole" | "hasAnyRole" => Some(Arc::new(
                move |ctx: &EvaluationContext<'_>| -> VigilResult<bool> {
                    Ok(arguments.iter().any(|role| ctx.identity().has_role(role)))
                },
            )),
            "hasAuthority" | "hasAnyAuthority" => Some(Arc::new(
                move |ctx: &EvaluationContext<'_>| -> VigilResult<bool> {
                    Ok(ctx.identity().has_any_authority(&arguments))
                },
            )),
            _ => None,
        }
    }
}

impl ExpressionEngine for PredicateEngine {
    fn compile(&self, text: &str) -> VigilResult<FilterExpression> {
        let predicate = match self.predicates.get(text) {
            Some(predicate) => predicate.clone(),
            None if self.builtins => Self::builtin(text).ok_or_else(|| unknown(text))?,
            None => return Err(unknown(text)),
        };
        Ok(FilterExpression::new(
            text,
            Arc::new(CompiledPredicate {
                text: text.to_string(),
                predicate,
                evaluations: self.evaluations.clone(),
            }),
        ))
    }
}

impl fmt::Debug for PredicateEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut registered: Vec<_> = self.predicates.keys().collect();
        registered.sort();
        f.debug_struct("PredicateEngine")
            .field("registered", &registered)
            .field("builtins", &self.builtins)
            .field("evaluations", &self.evaluations())
            .finish()
    }
}

struct CompiledPredicate {
    text: String,
    predicate: Predicate,
    evaluations: Arc<AtomicUsize>,
}

impl CompiledExpression for CompiledPredicate {
    fn evaluate(&self, context: &EvaluationContext<'_>) -> VigilResult<bool> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        (self.predicate)(context)
    }
}

impl fmt::Debug for CompiledPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompiledPredicate").field(&self.text).finish()
    }
}

fn constant(verdict: bool) -> Predicate {
    Arc::new(move |_: &EvaluationContext<'_>| -> VigilResult<bool> { Ok(verdict) })
}

fn unknown(text: &str) -> VigilError {
    VigilError::configuration(format!("unknown expression '{text}'"))
}

/// Split `name('a', 'b')` into its name and unquoted arguments.
fn parse_call(text: &str) -> Option<(&str, Vec<String>)> {
    let (name, rest) = text.split_once('(')?;
    let inner = rest.strip_suffix(')')?;
    let arguments: Option<Vec<String>> = inner
        .split(',')
        .map(|argument| {
            argument
                .trim()
                .strip_prefix('\'')
                .and_then(|quoted| quoted.strip_suffix('\''))
                .map(str::to_string)
        })
        .collect();
    let arguments = arguments?;
    if arguments.is_empty() {
        return None;
    }
    Some((name.trim(), arguments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigil_core::{Identity, Invocation, OperationDescriptor, ReturnShape};

    fn evaluate(engine: &PredicateEngine, text: &str, identity: &Identity) -> bool {
        let invocation = Invocation::new(
            Arc::new(OperationDescriptor::new("fixture_check", ReturnShape::Scalar)),
            vec![json!(1)],
        );
        let expression = engine.compile(text).unwrap();
        let context = EvaluationContext::for_invocation(identity, &invocation);
        engine.evaluate_boolean(&expression, &context).unwrap()
    }

    #[test]
    fn builtins_check_identity() {
        let engine = PredicateEngine::standard();
        let anne = Identity::new("anne")
            .with_role("A")
            .with_authority("docs:read");

        assert!(evaluate(&engine, "hasRole('A')", &anne));
        assert!(!evaluate(&engine, "hasRole('X')", &anne));
        assert!(evaluate(&engine, "hasAnyRole('X', 'A')", &anne));
        assert!(evaluate(&engine, "hasAuthority('docs:read')", &anne));
        assert!(!evaluate(&engine, "denyAll", &anne));
        assert_eq!(engine.evaluations(), 5);
    }

    #[test]
    fn unknown_text_fails_to_compile() {
        let engine = PredicateEngine::standard();
        assert!(engine.compile("hasMagic()").unwrap_err().is_configuration());
        assert!(engine.compile("hasRole(A)").unwrap_err().is_configuration());
        assert!(PredicateEngine::new()
            .compile("permitAll")
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn registered_predicates_take_precedence() {
        let engine = PredicateEngine::standard().with("permitAll", |_| Ok(false));
        assert!(!evaluate(&engine, "permitAll", &Identity::new("anne")));
    }
}
