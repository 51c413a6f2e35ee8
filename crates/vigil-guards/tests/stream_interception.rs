//! Streaming interception: laziness, per-element checks and termination

use assert_matches::assert_matches;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use vigil_core::{
    DeferredIdentity, DenialReason, ExpressionEngine, Identity, IdentityProvider,
    InterceptionConfig, InterceptorKind, OperationDescriptor, ReturnShape, VigilError,
    VigilResult,
};
use vigil_guards::{AsyncReturn, InterceptorRegistry};
use vigil_testkit::{
    anne, fixture_engine, init_tracing, strings, CallCounter, CountingIdentityProvider,
    PredicateEngine, RecordingEventPublisher, StaticIdentityProvider, FRUITS, RETURNS_OWN_RECORD,
    STARTS_WITH_A,
};

fn registry_with(
    engine: impl ExpressionEngine + 'static,
    identity: impl IdentityProvider + 'static,
) -> InterceptorRegistry {
    init_tracing();
    InterceptorRegistry::new(
        Arc::new(engine),
        Arc::new(identity),
        InterceptionConfig::default(),
    )
}

fn registry() -> InterceptorRegistry {
    registry_with(fixture_engine(), StaticIdentityProvider::new(anne()))
}

fn fruit_stream() -> OperationDescriptor {
    OperationDescriptor::new("fruit_stream", ReturnShape::Stream)
}

fn fruits() -> AsyncReturn {
    AsyncReturn::stream(stream::iter(strings(&FRUITS).into_iter().map(Ok)))
}

fn record(owner: &str) -> Value {
    json!({"id": 7, "owner": owner})
}

fn elements_of(value: AsyncReturn) -> vigil_guards::ValueStream {
    match value {
        AsyncReturn::Stream(elements) => elements,
        other => panic!("expected a stream, got {other:?}"),
    }
}

#[tokio::test]
async fn post_filter_keeps_stream_order() {
    let mut registry = registry();
    registry.post_filter("fruit_stream", STARTS_WITH_A).unwrap();
    let handler = registry
        .build()
        .wrap_streaming(fruit_stream(), |_| fruits())
        .unwrap();

    let kept = handler.invoke(vec![]).collect().await.unwrap();
    assert_eq!(kept, strings(&["apple", "aubergine"]));
}

#[tokio::test]
async fn dropping_the_stream_stops_evaluation() {
    let engine = fixture_engine();
    let evaluations = engine.clone();
    let mut registry = registry_with(engine, StaticIdentityProvider::new(anne()));
    registry.post_filter("fruit_stream", STARTS_WITH_A).unwrap();

    let pulls = CallCounter::new();
    let pulled = pulls.clone();
    let handler = registry
        .build()
        .wrap_streaming(fruit_stream(), move |_| {
            let pulled = pulled.clone();
            AsyncReturn::stream(stream::iter(FRUITS.into_iter().cycle()).map(move |fruit| {
                pulled.hit();
                Ok(json!(fruit))
            }))
        })
        .unwrap();

    let mut elements = elements_of(handler.invoke(vec![]));
    assert_eq!(elements.next().await.unwrap().unwrap(), json!("apple"));
    drop(elements);

    assert_eq!(evaluations.evaluations(), 1);
    assert_eq!(pulls.count(), 1);
}

#[tokio::test]
async fn identity_is_resolved_once_per_call() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let engine = PredicateEngine::standard().with("principal.tracked", move |ctx| {
        recorder.lock().push(ctx.identity() as *const Identity as usize);
        Ok(true)
    });
    let provider = CountingIdentityProvider::new(anne()).yielding();
    let mut registry = registry_with(engine, provider.clone());
    registry
        .post_filter("fruit_stream", "principal.tracked")
        .unwrap();
    let handler = registry
        .build()
        .wrap_streaming(fruit_stream(), |_| {
            AsyncReturn::stream(stream::iter(strings(&["a", "b", "c"]).into_iter().map(Ok)))
        })
        .unwrap();

    let kept = handler.invoke(vec![]).collect().await.unwrap();
    assert_eq!(kept.len(), 3);
    assert_eq!(provider.handles(), 1);
    assert_eq!(provider.resolutions(), 1);

    let expected = Arc::as_ptr(provider.identity()) as usize;
    let seen = seen.lock();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|pointer| *pointer == expected));
}

#[tokio::test]
async fn nothing_runs_until_polled() {
    let provider = CountingIdentityProvider::new(anne());
    let mut registry = registry_with(fixture_engine(), provider.clone());
    registry.pre_authorize("fruit_stream", "hasRole('A')").unwrap();

    let calls = CallCounter::new();
    let counter = calls.clone();
    let handler = registry
        .build()
        .wrap_streaming(fruit_stream(), move |_| {
            counter.hit();
            fruits()
        })
        .unwrap();

    let pending = handler.invoke(vec![]);
    assert_eq!(provider.handles(), 0);
    assert_eq!(calls.count(), 0);

    assert_eq!(pending.collect().await.unwrap().len(), FRUITS.len());
    assert_eq!(provider.handles(), 1);
    assert_eq!(calls.count(), 1);
}

#[tokio::test]
async fn before_call_denial_fails_the_sequence() {
    let mut registry = registry();
    registry.pre_authorize("fruit_stream", "hasRole('B')").unwrap();

    let calls = CallCounter::new();
    let counter = calls.clone();
    let handler = registry
        .build()
        .wrap_streaming(fruit_stream(), move |_| {
            counter.hit();
            fruits()
        })
        .unwrap();

    let outcomes: Vec<VigilResult<Value>> = elements_of(handler.invoke(vec![])).collect().await;
    assert_eq!(outcomes.len(), 1);
    assert_matches!(
        &outcomes[0],
        Err(VigilError::Denied {
            stage: InterceptorKind::BeforeCall,
            ..
        })
    );
    assert_eq!(calls.count(), 0);
}

#[tokio::test]
async fn deferred_result_is_checked_after_the_call() {
    let mut registry = registry();
    registry
        .post_authorize("load_record", RETURNS_OWN_RECORD)
        .unwrap();
    let handler = registry
        .build()
        .wrap_streaming(
            OperationDescriptor::new("load_record", ReturnShape::Deferred).with_parameter("owner"),
            |invocation| {
                let owner = invocation
                    .argument(0)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                AsyncReturn::deferred(async move { Ok(Some(record(&owner))) })
            },
        )
        .unwrap();

    let own = handler.invoke(vec![json!("anne")]);
    assert_matches!(own, AsyncReturn::Deferred(_));
    assert_eq!(own.collect().await.unwrap(), vec![record("anne")]);

    let err = handler
        .invoke(vec![json!("bob")])
        .collect()
        .await
        .unwrap_err();
    assert_matches!(
        err,
        VigilError::Denied {
            stage: InterceptorKind::AfterCall,
            ..
        }
    );
}

#[tokio::test]
async fn removed_single_values_keep_their_shape() {
    let mut registry = registry();
    registry.post_filter("maybe_fruit", STARTS_WITH_A).unwrap();
    registry.post_filter("next_fruit", STARTS_WITH_A).unwrap();
    let interceptor = registry.build();

    let deferred = interceptor
        .wrap_streaming(
            OperationDescriptor::new("maybe_fruit", ReturnShape::Deferred),
            |_| AsyncReturn::deferred(async { Ok(Some(json!("banana"))) }),
        )
        .unwrap();
    match deferred.invoke(vec![]) {
        AsyncReturn::Deferred(value) => assert_eq!(value.await.unwrap(), None),
        other => panic!("expected a deferred value, got {other:?}"),
    }

    let suspended = interceptor
        .wrap_streaming(
            OperationDescriptor::new("next_fruit", ReturnShape::Suspended),
            |_| AsyncReturn::suspended(async { Ok(json!("orange")) }),
        )
        .unwrap();
    match suspended.invoke(vec![]) {
        AsyncReturn::Suspended(value) => assert_eq!(value.await.unwrap(), Value::Null),
        other => panic!("expected a suspended value, got {other:?}"),
    }
}

#[tokio::test]
async fn after_call_on_a_stream_drops_denied_elements() {
    let events = RecordingEventPublisher::new();
    let mut registry = registry().with_event_publisher(Arc::new(events.clone()));
    registry
        .post_authorize("record_feed", RETURNS_OWN_RECORD)
        .unwrap();
    let handler = registry
        .build()
        .wrap_streaming(
            OperationDescriptor::new("record_feed", ReturnShape::Stream),
            |_| {
                let feed = vec![Ok(record("anne")), Ok(record("bob")), Ok(record("anne"))];
                AsyncReturn::stream(stream::iter(feed))
            },
        )
        .unwrap();

    let kept = handler.invoke(vec![]).collect().await.unwrap();
    assert_eq!(kept, vec![record("anne"), record("anne")]);
    assert_eq!(events.denials().len(), 1);
    assert_eq!(events.count_at(InterceptorKind::AfterCall), 1);
}

#[tokio::test]
async fn after_call_and_post_filter_combine_per_element() {
    let engine = fixture_engine().with("filterObject.id % 2 == 0", |ctx| {
        Ok(ctx
            .filter_object()
            .and_then(|element| element.get("id"))
            .and_then(Value::as_i64)
            .is_some_and(|id| id % 2 == 0))
    });
    let evaluations = engine.clone();
    let events = RecordingEventPublisher::new();
    let mut registry = registry_with(engine, StaticIdentityProvider::new(anne()))
        .with_event_publisher(Arc::new(events.clone()));
    registry
        .post_authorize("record_feed", RETURNS_OWN_RECORD)
        .unwrap()
        .post_filter("record_feed", "filterObject.id % 2 == 0")
        .unwrap();
    let handler = registry
        .build()
        .wrap_streaming(
            OperationDescriptor::new("record_feed", ReturnShape::Stream),
            |_| {
                let feed = [
                    ("anne", 1),
                    ("bob", 2),
                    ("anne", 2),
                    ("anne", 4),
                    ("bob", 3),
                    ("anne", 5),
                ]
                .map(|(owner, id)| -> VigilResult<Value> { Ok(json!({"id": id, "owner": owner})) });
                AsyncReturn::stream(stream::iter(feed))
            },
        )
        .unwrap();

    let kept = handler.invoke(vec![]).collect().await.unwrap();
    assert_eq!(
        kept,
        vec![
            json!({"id": 2, "owner": "anne"}),
            json!({"id": 4, "owner": "anne"}),
        ]
    );
    assert_eq!(events.count_at(InterceptorKind::AfterCall), 2);
    assert_eq!(events.count_at(InterceptorKind::PostFilter), 0);
    // Six after-call checks; the post-filter only sees the four survivors.
    assert_eq!(evaluations.evaluations(), 10);
}

#[tokio::test]
async fn failed_identity_resolution_fails_the_sequence_as_a_denial() {
    let unavailable = || DeferredIdentity::from_fn(|| Err(VigilError::evaluation("store offline")));
    let mut registry = registry_with(fixture_engine(), unavailable);
    registry.post_filter("fruit_stream", STARTS_WITH_A).unwrap();

    let calls = CallCounter::new();
    let counter = calls.clone();
    let handler = registry
        .build()
        .wrap_streaming(fruit_stream(), move |_| {
            counter.hit();
            fruits()
        })
        .unwrap();

    let outcomes: Vec<VigilResult<Value>> = elements_of(handler.invoke(vec![])).collect().await;
    assert_eq!(outcomes.len(), 1);
    assert_matches!(
        &outcomes[0],
        Err(VigilError::Denied {
            stage: InterceptorKind::PostFilter,
            reason: DenialReason::IdentityUnavailable { detail: Some(_) },
        })
    );
    assert_eq!(calls.count(), 0);
}

#[tokio::test]
async fn upstream_failure_ends_the_stream_unchanged() {
    let mut registry = registry();
    registry.post_filter("fruit_stream", STARTS_WITH_A).unwrap();

    let failure = VigilError::upstream_message("orchard offline");
    let raised = failure.clone();
    let handler = registry
        .build()
        .wrap_streaming(fruit_stream(), move |_| {
            let feed = vec![
                Ok(json!("apple")),
                Err(raised.clone()),
                Ok(json!("aubergine")),
            ];
            AsyncReturn::stream(stream::iter(feed))
        })
        .unwrap();

    let outcomes: Vec<VigilResult<Value>> = elements_of(handler.invoke(vec![])).collect().await;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].as_ref().unwrap(), &json!("apple"));
    match (&outcomes[1], &failure) {
        (Err(VigilError::Upstream(returned)), VigilError::Upstream(original)) => {
            assert!(returned.same_instance(original));
        }
        (other, _) => panic!("expected the upstream failure, got {other:?}"),
    }
}

#[tokio::test]
async fn element_evaluation_error_terminates_the_stream() {
    let engine = PredicateEngine::new().with("filterObject > 0", |ctx| {
        let number = ctx
            .filter_object()
            .and_then(Value::as_i64)
            .ok_or_else(|| VigilError::evaluation("element is not a number"))?;
        Ok(number > 0)
    });
    let evaluations = engine.clone();
    let mut registry = registry_with(engine, StaticIdentityProvider::new(anne()));
    registry
        .post_filter("amounts", "filterObject > 0")
        .unwrap();
    let handler = registry
        .build()
        .wrap_streaming(
            OperationDescriptor::new("amounts", ReturnShape::Stream),
            |_| {
                let amounts = vec![Ok(json!(3)), Ok(json!("x")), Ok(json!(5))];
                AsyncReturn::stream(stream::iter(amounts))
            },
        )
        .unwrap();

    let outcomes: Vec<VigilResult<Value>> = elements_of(handler.invoke(vec![])).collect().await;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].as_ref().unwrap(), &json!(3));
    assert_matches!(&outcomes[1], Err(err) if err.is_evaluation());
    assert_eq!(evaluations.evaluations(), 2);
}

#[tokio::test]
async fn ambiguous_publisher_is_treated_as_single_when_lenient() {
    let mut registry = registry();
    registry.pre_authorize("fruit_source", "hasRole('A')").unwrap();
    let handler = registry
        .build()
        .wrap_streaming(
            OperationDescriptor::new("fruit_source", ReturnShape::Publisher),
            |_| fruits(),
        )
        .unwrap();

    let first = handler.invoke(vec![]);
    assert_matches!(first, AsyncReturn::Deferred(_));
    assert_eq!(first.collect().await.unwrap(), vec![json!("apple")]);
}

#[tokio::test]
async fn missing_identity_fails_with_authentication_required() {
    let mut registry = registry_with(fixture_engine(), StaticIdentityProvider::anonymous());
    registry.post_filter("fruit_stream", STARTS_WITH_A).unwrap();
    let handler = registry
        .build()
        .wrap_streaming(fruit_stream(), |_| fruits())
        .unwrap();

    let err = handler.invoke(vec![]).collect().await.unwrap_err();
    assert!(err.is_denied());
    assert_eq!(
        err.denial_reason(),
        Some(&DenialReason::AuthenticationRequired)
    );
}
