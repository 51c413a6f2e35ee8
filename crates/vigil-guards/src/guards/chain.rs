//! Per-operation stage plan
//!
//! A `StagePlan` is resolved once, when an operation is wrapped, from the
//! descriptors registered for it:
//!
//! 1. Descriptors are split by kind and ordered by priority
//! 2. Pre-filter targets are resolved to argument positions
//! 3. Return cardinality is classified from the declared shape
//! 4. Shape/stage combinations that cannot work are rejected
//!
//! Every configuration error surfaces here, so calls never fail for
//! configuration reasons. The stage methods are shared by the blocking and
//! streaming interceptors; they run inline and never suspend.

use super::descriptor::{InterceptorCheck, InterceptorDescriptor};
use super::filter::FilterEvaluator;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vigil_core::{
    order_by_priority, AuthorizationEvent, AuthorizationEventPublisher, AuthorizationManager,
    Cardinality, Decision, DeferredIdentity, DenialDetail, DenialReason, EventOutcome,
    ExpressionEngine, FilterExpression, IdentityProvider, InterceptionConfig, InterceptorKind,
    Invocation, InvocationResult, OperationDescriptor, Priority, ReturnShape, VigilError,
    VigilResult,
};

/// Collaborators shared by every plan built from one registry.
pub(crate) struct GuardEnvironment {
    pub(crate) engine: Arc<dyn ExpressionEngine>,
    pub(crate) identity: Arc<dyn IdentityProvider>,
    pub(crate) config: InterceptionConfig,
    pub(crate) events: Arc<dyn AuthorizationEventPublisher>,
}

struct PreFilterStage {
    index: usize,
    expression: FilterExpression,
    constraint: Option<FilterExpression>,
}

/// Resolved checks for one operation, in execution order.
pub(crate) struct StagePlan {
    environment: Arc<GuardEnvironment>,
    operation: Arc<OperationDescriptor>,
    cardinality: Cardinality,
    pre_filters: Vec<PreFilterStage>,
    before: Vec<Arc<dyn AuthorizationManager<Invocation>>>,
    after: Vec<Arc<dyn AuthorizationManager<InvocationResult>>>,
    post_filters: Vec<FilterExpression>,
    pre_evaluator: FilterEvaluator,
    post_evaluator: FilterEvaluator,
}

impl StagePlan {
    pub(crate) fn resolve(
        environment: Arc<GuardEnvironment>,
        operation: OperationDescriptor,
        descriptors: &[InterceptorDescriptor],
    ) -> VigilResult<Self> {
        let cardinality = classify(&environment.config, &operation)?;

        let mut ordered: Vec<(Priority, &InterceptorDescriptor)> = descriptors
            .iter()
            .map(|descriptor| (descriptor.priority(), descriptor))
            .collect();
        order_by_priority(&mut ordered);

        let mut pre_filters = Vec::new();
        let mut before = Vec::new();
        let mut after = Vec::new();
        let mut post_filters = Vec::new();

        for (_, descriptor) in ordered {
            match descriptor.check() {
                InterceptorCheck::PreFilter {
                    target,
                    expression,
                    constraint,
                } => pre_filters.push(PreFilterStage {
                    index: filter_target(&operation, target.as_deref())?,
                    expression: expression.clone(),
                    constraint: constraint.clone(),
                }),
                InterceptorCheck::BeforeCall(manager) => before.push(manager.clone()),
                InterceptorCheck::AfterCall(manager) => after.push(manager.clone()),
                InterceptorCheck::PostFilter(expression) => {
                    if !operation.return_shape().supports_post_filter() {
                        return Err(VigilError::configuration(format!(
                            "post-filter '{expression}' on '{}' requires a sequence, map or asynchronous result, found {}",
                            operation.id(),
                            operation.return_shape()
                        )));
                    }
                    post_filters.push(expression.clone());
                }
            }
        }

        if cardinality == Cardinality::Multi && !after.is_empty() {
            debug!(
                operation = %operation.id(),
                managers = after.len(),
                "After-call managers on a multi-value result run per element"
            );
        }

        info!(
            operation = %operation.id(),
            shape = %operation.return_shape(),
            ?cardinality,
            pre_filters = pre_filters.len(),
            before_call = before.len(),
            after_call = after.len(),
            post_filters = post_filters.len(),
            "Resolved interception plan"
        );

        Ok(Self {
            pre_evaluator: FilterEvaluator::new(
                environment.engine.clone(),
                InterceptorKind::PreFilter,
            ),
            post_evaluator: FilterEvaluator::new(
                environment.engine.clone(),
                InterceptorKind::PostFilter,
            ),
            environment,
            operation: Arc::new(operation),
            cardinality,
            pre_filters,
            before,
            after,
            post_filters,
        })
    }

    pub(crate) fn operation(&self) -> &Arc<OperationDescriptor> {
        &self.operation
    }

    pub(crate) fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Returns `true` if any stage needs the caller identity.
    pub(crate) fn has_checks(&self) -> bool {
        !(self.pre_filters.is_empty()
            && self.before.is_empty()
            && self.after.is_empty()
            && self.post_filters.is_empty())
    }

    /// A fresh identity handle for one call.
    pub(crate) fn current_identity(&self) -> DeferredIdentity {
        self.environment.identity.current_identity()
    }

    /// Denial for a call whose identity could not be resolved, reported at
    /// the first configured stage. Configuration errors pass through.
    pub(crate) fn identity_unavailable(
        &self,
        identity: &DeferredIdentity,
        err: VigilError,
    ) -> VigilError {
        if err.is_configuration() {
            return err;
        }
        self.refuse(
            self.first_stage(),
            identity,
            DenialReason::identity_unavailable(err.to_string()),
        )
    }

    /// Filter the designated arguments in place.
    pub(crate) fn pre_filter(
        &self,
        identity: &DeferredIdentity,
        invocation: &mut Invocation,
    ) -> VigilResult<()> {
        for stage in &self.pre_filters {
            let argument = invocation.argument(stage.index).cloned().ok_or_else(|| {
                VigilError::evaluation(format!(
                    "pre-filter target at position {} is missing from the call to '{}'",
                    stage.index,
                    self.operation.id()
                ))
            })?;
            let filtered = self
                .pre_evaluator
                .filter_value(
                    identity,
                    argument,
                    &stage.expression,
                    stage.constraint.as_ref(),
                    invocation,
                )
                .map_err(|e| self.escalate(identity, e))?;
            invocation.replace_argument(stage.index, filtered);
        }
        Ok(())
    }

    /// Run every before-call manager; the first denial wins.
    pub(crate) fn check_before(
        &self,
        identity: &DeferredIdentity,
        invocation: &Invocation,
    ) -> VigilResult<()> {
        for manager in &self.before {
            let decision = manager.decide(identity, invocation)?;
            debug!(manager = manager.name(), ?decision, "Before-call decision");
            self.settle(InterceptorKind::BeforeCall, identity, decision)?;
        }
        Ok(())
    }

    /// Run every after-call manager against a completed result.
    pub(crate) fn check_after(
        &self,
        identity: &DeferredIdentity,
        result: &InvocationResult,
    ) -> VigilResult<()> {
        for manager in &self.after {
            let decision = manager.decide(identity, result)?;
            debug!(manager = manager.name(), ?decision, "After-call decision");
            self.settle(InterceptorKind::AfterCall, identity, decision)?;
        }
        Ok(())
    }

    /// After-call managers applied as a keep verdict on one element of a
    /// multi-value result. A denial drops the element instead of failing,
    /// except an identity failure, which fails the sequence.
    pub(crate) fn keep_after(
        &self,
        identity: &DeferredIdentity,
        element: &InvocationResult,
    ) -> VigilResult<bool> {
        for manager in &self.after {
            match manager.decide(identity, element)? {
                Decision::Denied { reason } if reason.is_identity_failure() => {
                    return Err(self.refuse(InterceptorKind::AfterCall, identity, reason));
                }
                Decision::Denied { reason } => {
                    let reason = self.shape_reason(reason);
                    debug!(
                        manager = manager.name(),
                        %reason,
                        "Element dropped by after-call manager"
                    );
                    self.publish(
                        InterceptorKind::AfterCall,
                        identity,
                        EventOutcome::Denied { reason },
                    );
                    return Ok(false);
                }
                Decision::Granted => self.publish_grant(InterceptorKind::AfterCall, identity),
                Decision::Abstained => {}
            }
        }
        Ok(true)
    }

    /// Post-filter a whole blocking result.
    pub(crate) fn post_filter_value(
        &self,
        identity: &DeferredIdentity,
        mut value: Value,
        invocation: &Invocation,
    ) -> VigilResult<Value> {
        for expression in &self.post_filters {
            value = self
                .post_evaluator
                .filter_value(identity, value, expression, None, invocation)
                .map_err(|e| self.escalate(identity, e))?;
        }
        Ok(value)
    }

    /// Post-filter verdict for one element of an asynchronous result.
    pub(crate) fn post_filter_element(
        &self,
        identity: &DeferredIdentity,
        element: &Value,
        invocation: &Invocation,
    ) -> VigilResult<bool> {
        for expression in &self.post_filters {
            let keep = self
                .post_evaluator
                .keep(identity, element, expression, invocation)
                .map_err(|e| self.escalate(identity, e))?;
            if !keep {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn settle(
        &self,
        stage: InterceptorKind,
        identity: &DeferredIdentity,
        decision: Decision,
    ) -> VigilResult<()> {
        match decision {
            Decision::Denied { reason } => Err(self.refuse(stage, identity, reason)),
            Decision::Granted => {
                self.publish_grant(stage, identity);
                Ok(())
            }
            Decision::Abstained => Ok(()),
        }
    }

    fn first_stage(&self) -> InterceptorKind {
        if !self.pre_filters.is_empty() {
            InterceptorKind::PreFilter
        } else if !self.before.is_empty() {
            InterceptorKind::BeforeCall
        } else if !self.after.is_empty() {
            InterceptorKind::AfterCall
        } else {
            InterceptorKind::PostFilter
        }
    }

    /// Turn a denial into the error handed to the caller.
    fn refuse(
        &self,
        stage: InterceptorKind,
        identity: &DeferredIdentity,
        reason: DenialReason,
    ) -> VigilError {
        let reason = self.shape_reason(reason);
        warn!(
            operation = %self.operation.id(),
            %stage,
            %reason,
            "Access denied"
        );
        self.publish(
            stage,
            identity,
            EventOutcome::Denied {
                reason: reason.clone(),
            },
        );
        VigilError::denied(stage, reason)
    }

    /// Route denials raised inside filter evaluation through `refuse`.
    fn escalate(&self, identity: &DeferredIdentity, err: VigilError) -> VigilError {
        match err {
            VigilError::Denied { stage, reason } => self.refuse(stage, identity, reason),
            other => {
                warn!(operation = %self.operation.id(), error = %other, "Filter evaluation failed");
                other
            }
        }
    }

    fn shape_reason(&self, reason: DenialReason) -> DenialReason {
        match self.environment.config.denial_reason_detail {
            DenialDetail::Verbose => reason,
            DenialDetail::Terse => reason.terse(),
        }
    }

    fn publish_grant(&self, stage: InterceptorKind, identity: &DeferredIdentity) {
        if self.environment.config.publish_granted_events {
            self.publish(stage, identity, EventOutcome::Granted);
        }
    }

    fn publish(&self, stage: InterceptorKind, identity: &DeferredIdentity, outcome: EventOutcome) {
        self.environment.events.publish(&AuthorizationEvent {
            operation: self.operation.id().clone(),
            stage,
            principal: identity
                .resolved()
                .map(|resolved| resolved.principal().to_string()),
            outcome,
        });
    }
}

/// Classify result cardinality from the declared shape.
fn classify(
    config: &InterceptionConfig,
    operation: &OperationDescriptor,
) -> VigilResult<Cardinality> {
    if let Some(cardinality) = operation.return_shape().cardinality() {
        return Ok(cardinality);
    }
    if config.fail_on_ambiguous_cardinality {
        return Err(VigilError::configuration(format!(
            "cannot determine whether '{}' returns one value or many; declare a deferred or stream shape",
            operation.id()
        )));
    }
    warn!(
        operation = %operation.id(),
        shape = %ReturnShape::Publisher,
        "Result cardinality is ambiguous; treating it as single-valued"
    );
    Ok(Cardinality::Single)
}

/// Argument position a pre-filter applies to.
fn filter_target(operation: &OperationDescriptor, target: Option<&str>) -> VigilResult<usize> {
    match target {
        Some(name) => operation.parameter_index(name).ok_or_else(|| {
            VigilError::configuration(format!(
                "pre-filter target '{name}' is not a parameter of '{}'",
                operation.id()
            ))
        }),
        None => match operation.parameters() {
            [_] => Ok(0),
            [] => Err(VigilError::configuration(format!(
                "pre-filter on '{}' has no parameter to filter",
                operation.id()
            ))),
            parameters => Err(VigilError::configuration(format!(
                "pre-filter on '{}' needs an explicit target among [{}]",
                operation.id(),
                parameters.join(", ")
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use vigil_core::{Identity, NoopEventPublisher};
    use vigil_testkit::PredicateEngine;

    fn environment(config: InterceptionConfig) -> Arc<GuardEnvironment> {
        Arc::new(GuardEnvironment {
            engine: Arc::new(PredicateEngine::standard()),
            identity: Arc::new(|| DeferredIdentity::of(Identity::new("anne"))),
            config,
            events: Arc::new(NoopEventPublisher),
        })
    }

    fn expression(text: &str) -> FilterExpression {
        PredicateEngine::standard().compile(text).unwrap()
    }

    fn pre_filter(target: Option<&str>) -> InterceptorDescriptor {
        InterceptorDescriptor::new(InterceptorCheck::PreFilter {
            target: target.map(str::to_string),
            expression: expression("permitAll"),
            constraint: None,
        })
    }

    #[test]
    fn single_parameter_is_the_implicit_filter_target() {
        let operation =
            OperationDescriptor::new("share", ReturnShape::Scalar).with_parameter("documents");
        let plan = StagePlan::resolve(
            environment(InterceptionConfig::default()),
            operation,
            &[pre_filter(None)],
        )
        .unwrap();
        assert_eq!(plan.pre_filters[0].index, 0);
    }

    #[test]
    fn filter_target_must_be_unambiguous() {
        let operation = OperationDescriptor::new("share", ReturnShape::Scalar)
            .with_parameter("owner")
            .with_parameter("documents");

        let err = StagePlan::resolve(
            environment(InterceptionConfig::default()),
            operation.clone(),
            &[pre_filter(None)],
        )
        .err()
        .unwrap();
        assert!(err.is_configuration());

        let err = StagePlan::resolve(
            environment(InterceptionConfig::default()),
            operation.clone(),
            &[pre_filter(Some("missing"))],
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("missing"));

        let plan = StagePlan::resolve(
            environment(InterceptionConfig::default()),
            operation,
            &[pre_filter(Some("documents"))],
        )
        .unwrap();
        assert_eq!(plan.pre_filters[0].index, 1);
    }

    #[test]
    fn post_filter_on_scalar_fails_at_setup() {
        let operation = OperationDescriptor::new("balance", ReturnShape::Scalar);
        let descriptor = InterceptorDescriptor::new(InterceptorCheck::PostFilter(expression(
            "permitAll",
        )));
        let err = StagePlan::resolve(
            environment(InterceptionConfig::default()),
            operation,
            &[descriptor],
        )
        .err()
        .unwrap();
        assert_matches!(err, VigilError::Configuration { .. });
    }

    #[test]
    fn ambiguous_cardinality_depends_on_config() {
        let operation = OperationDescriptor::new("feed", ReturnShape::Publisher);

        let lenient = StagePlan::resolve(
            environment(InterceptionConfig::default()),
            operation.clone(),
            &[],
        )
        .unwrap();
        assert_eq!(lenient.cardinality(), Cardinality::Single);

        let err = StagePlan::resolve(environment(InterceptionConfig::strict()), operation, &[])
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn managers_run_in_priority_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let manager = |name: &'static str| -> Arc<dyn AuthorizationManager<Invocation>> {
            let order = order.clone();
            Arc::new(
                move |_: &DeferredIdentity, _: &Invocation| -> VigilResult<Decision> {
                    order.lock().push(name);
                    Ok(Decision::abstained())
                },
            )
        };
        let descriptors = [
            InterceptorDescriptor::new(InterceptorCheck::BeforeCall(manager("default"))),
            InterceptorDescriptor::new(InterceptorCheck::BeforeCall(manager("late")))
                .with_priority(Priority::LAST),
            InterceptorDescriptor::new(InterceptorCheck::BeforeCall(manager("early")))
                .with_priority(10),
            InterceptorDescriptor::new(InterceptorCheck::BeforeCall(manager("default-2"))),
        ];
        let plan = StagePlan::resolve(
            environment(InterceptionConfig::default()),
            OperationDescriptor::new("audit", ReturnShape::Scalar),
            &descriptors,
        )
        .unwrap();

        let invocation = Invocation::new(plan.operation().clone(), vec![]);
        plan.check_before(&plan.current_identity(), &invocation)
            .unwrap();
        assert_eq!(*order.lock(), vec!["early", "default", "default-2", "late"]);
    }
}
