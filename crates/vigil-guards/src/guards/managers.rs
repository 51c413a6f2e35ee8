//! Authorization managers
//!
//! Stock `AuthorizationManager` implementations:
//!
//! - `ExpressionAuthorizationManager`: evaluates a compiled expression against
//!   the invocation (before-call) or the invocation result (after-call)
//! - `AuthorityAuthorizationManager`: grants when the caller holds any of a
//!   fixed set of authorities
//! - `AuthorizationManagers::all_of` / `any_of`: composites

use super::filter::evaluation_failure;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use vigil_core::{
    AuthorizationManager, Decision, DeferredIdentity, DenialReason, EvaluationContext,
    ExpressionEngine, FilterExpression, Invocation, InvocationResult, VigilResult,
};

/// Manager backed by a compiled policy expression.
#[derive(Clone)]
pub struct ExpressionAuthorizationManager {
    engine: Arc<dyn ExpressionEngine>,
    expression: FilterExpression,
}

impl ExpressionAuthorizationManager {
    /// Create a manager for an already compiled expression.
    pub fn new(engine: Arc<dyn ExpressionEngine>, expression: FilterExpression) -> Self {
        Self { engine, expression }
    }

    /// Compile `text` with `engine`.
    pub fn compile(engine: Arc<dyn ExpressionEngine>, text: &str) -> VigilResult<Self> {
        let expression = engine.compile(text)?;
        Ok(Self::new(engine, expression))
    }

    /// The compiled expression.
    pub fn expression(&self) -> &FilterExpression {
        &self.expression
    }

    fn evaluate(
        &self,
        identity: &DeferredIdentity,
        invocation: &Invocation,
        return_object: Option<&Value>,
    ) -> VigilResult<Decision> {
        let resolved = match identity.require_blocking()? {
            Ok(resolved) => resolved,
            Err(reason) => return Ok(Decision::denied(reason)),
        };

        let mut context = EvaluationContext::for_invocation(&resolved, invocation);
        if let Some(value) = return_object {
            context = context.with_return_object(value);
        }

        let granted = self
            .engine
            .evaluate_boolean(&self.expression, &context)
            .map_err(|e| evaluation_failure(&self.expression, e))?;

        debug!(
            expression = %self.expression,
            principal = resolved.principal(),
            granted,
            "Expression decision"
        );

        Ok(Decision::from_verdict(granted, || {
            DenialReason::access_denied_with(format!(
                "expression '{}' evaluated to false",
                self.expression
            ))
        }))
    }
}

impl std::fmt::Debug for ExpressionAuthorizationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionAuthorizationManager")
            .field("expression", &self.expression)
            .finish_non_exhaustive()
    }
}

impl AuthorizationManager<Invocation> for ExpressionAuthorizationManager {
    fn decide(&self, identity: &DeferredIdentity, subject: &Invocation) -> VigilResult<Decision> {
        self.evaluate(identity, subject, None)
    }

    fn name(&self) -> &str {
        self.expression.source()
    }
}

impl AuthorizationManager<InvocationResult> for ExpressionAuthorizationManager {
    fn decide(
        &self,
        identity: &DeferredIdentity,
        subject: &InvocationResult,
    ) -> VigilResult<Decision> {
        self.evaluate(identity, subject.invocation(), Some(subject.result()))
    }

    fn name(&self) -> &str {
        self.expression.source()
    }
}

/// Grants when the caller holds any of the configured authorities.
///
/// With no authorities configured the manager abstains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityAuthorizationManager {
    authorities: Vec<String>,
}

impl AuthorityAuthorizationManager {
    /// Require any of `authorities`.
    pub fn any_authority<I, S>(authorities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            authorities: authorities.into_iter().map(Into::into).collect(),
        }
    }

    /// Require any of `roles`; names are stored with the role prefix.
    pub fn any_role<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::any_authority(roles.into_iter().map(|role| {
            let role = role.as_ref();
            if role.starts_with(vigil_core::identity::ROLE_PREFIX) {
                role.to_string()
            } else {
                format!("{}{role}", vigil_core::identity::ROLE_PREFIX)
            }
        }))
    }

    /// Required authorities.
    pub fn authorities(&self) -> &[String] {
        &self.authorities
    }
}

impl<S> AuthorizationManager<S> for AuthorityAuthorizationManager {
    fn decide(&self, identity: &DeferredIdentity, _subject: &S) -> VigilResult<Decision> {
        if self.authorities.is_empty() {
            return Ok(Decision::abstained());
        }
        let resolved = match identity.require_blocking()? {
            Ok(resolved) => resolved,
            Err(reason) => return Ok(Decision::denied(reason)),
        };
        Ok(Decision::from_verdict(
            resolved.has_any_authority(&self.authorities),
            || {
                DenialReason::access_denied_with(format!(
                    "requires any of [{}]",
                    self.authorities.join(", ")
                ))
            },
        ))
    }

    fn name(&self) -> &str {
        "authority"
    }
}

/// Composite manager constructors.
pub struct AuthorizationManagers;

impl AuthorizationManagers {
    /// Denied if any member denies; granted if at least one grants.
    pub fn all_of<S>(managers: Vec<Arc<dyn AuthorizationManager<S>>>) -> AllOf<S> {
        AllOf { managers }
    }

    /// Granted if any member grants; denied if none grants and one denies.
    pub fn any_of<S>(managers: Vec<Arc<dyn AuthorizationManager<S>>>) -> AnyOf<S> {
        AnyOf { managers }
    }
}

/// See [`AuthorizationManagers::all_of`].
pub struct AllOf<S> {
    managers: Vec<Arc<dyn AuthorizationManager<S>>>,
}

impl<S> AuthorizationManager<S> for AllOf<S> {
    fn decide(&self, identity: &DeferredIdentity, subject: &S) -> VigilResult<Decision> {
        let mut granted = false;
        for manager in &self.managers {
            match manager.decide(identity, subject)? {
                Decision::Denied { reason } => return Ok(Decision::denied(reason)),
                Decision::Granted => granted = true,
                Decision::Abstained => {}
            }
        }
        Ok(if granted {
            Decision::granted()
        } else {
            Decision::abstained()
        })
    }

    fn name(&self) -> &str {
        "all-of"
    }
}

/// See [`AuthorizationManagers::any_of`].
pub struct AnyOf<S> {
    managers: Vec<Arc<dyn AuthorizationManager<S>>>,
}

impl<S> AuthorizationManager<S> for AnyOf<S> {
    fn decide(&self, identity: &DeferredIdentity, subject: &S) -> VigilResult<Decision> {
        let mut first_denial = None;
        for manager in &self.managers {
            match manager.decide(identity, subject)? {
                Decision::Granted => return Ok(Decision::granted()),
                Decision::Denied { reason } => {
                    first_denial.get_or_insert(reason);
                }
                Decision::Abstained => {}
            }
        }
        Ok(match first_denial {
            Some(reason) => Decision::denied(reason),
            None => Decision::abstained(),
        })
    }

    fn name(&self) -> &str {
        "any-of"
    }
}
