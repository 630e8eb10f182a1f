mod common;

use common::{faulty, flaky, Invocations, SeenFailures};
use ninelives_interceptors::prelude::*;
use ninelives_interceptors::{CallEvent, CorrelationId, RecordingSleeper, INTERNAL_ERROR_MESSAGE};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tower::ServiceExt;

fn instant_retry(max_retries: usize) -> RetryPolicy {
    RetryPolicy::builder().max_retries(max_retries).with_sleeper(InstantSleeper).build().unwrap()
}

#[tokio::test]
async fn recovery_inside_retry_hides_transient_codes() {
    // Recovery turns Unavailable into Internal before retry sees it, so nothing is retried.
    let seen = SeenFailures::default();
    let invocations = Invocations::default();
    let svc = InterceptorChain::<String, String>::new()
        .layer(RetryLayer::new(instant_retry(3)))
        .layer(RecoveryLayer::with_handler(seen.handler()))
        .build(flaky(usize::MAX, invocations.clone()));

    let err = svc.oneshot(Call::new("x".into(), CallContext::new("/svc/M"))).await.unwrap_err();
    assert_eq!(err.code(), Code::Internal);
    assert_eq!(invocations.get(), 1);
    assert_eq!(seen.all().len(), 1);
}

#[tokio::test]
async fn faults_only_recovery_keeps_codes_for_retry() {
    let seen = SeenFailures::default();
    let invocations = Invocations::default();
    let svc = InterceptorChain::<String, String>::new()
        .layer(RetryLayer::new(instant_retry(3)))
        .layer(RecoveryLayer::with_handler(seen.handler()).faults_only())
        .build(flaky(2, invocations.clone()));

    let reply = svc.oneshot(Call::new("x".into(), CallContext::new("/svc/M"))).await.unwrap();
    assert_eq!(reply, "echo: x");
    assert_eq!(invocations.get(), 3);
    assert!(seen.all().is_empty());
}

#[tokio::test]
async fn without_recovery_faults_propagate_raw() {
    let invocations = Invocations::default();
    let svc = InterceptorChain::<String, String>::new()
        .layer(RetryLayer::new(instant_retry(3)))
        .layer(LoggingLayer::new(Arc::new(MemoryLogger::new())))
        .build(faulty("dangling reference", invocations.clone()));

    let err = svc.oneshot(Call::new("x".into(), CallContext::new("/svc/M"))).await.unwrap_err();
    assert!(err.is_fault());
    assert_eq!(err.message(), "dangling reference");
    assert_ne!(err.message(), INTERNAL_ERROR_MESSAGE);
    assert_eq!(invocations.get(), 1);
}

#[tokio::test]
async fn correlation_is_stable_within_a_call_and_unique_across_calls() {
    let logger = MemoryLogger::new();
    let svc = InterceptorChain::<String, String>::new()
        .layer(RetryLayer::new(instant_retry(2)))
        .layer(LoggingLayer::new(Arc::new(logger.clone())))
        .layer(CorrelationLayer::new())
        .build(flaky(1, Invocations::default()));

    let ctx = CallContext::new("/svc/M");
    svc.clone().oneshot(Call::new("a".into(), ctx.clone())).await.unwrap();
    let id = ctx.header(REQUEST_ID_HEADER).expect("assigned id");

    // The first start entry precedes correlation; every later entry carries the same id.
    let entries = logger.entries();
    assert_eq!(entries.len(), 4);
    assert!(entries[1..].iter().all(|e| e.correlation_id.as_deref() == Some(id.as_str())));

    let mut ids = HashSet::new();
    for _ in 0..50 {
        let ctx = CallContext::new("/svc/M");
        svc.clone().oneshot(Call::new("b".into(), ctx.clone())).await.unwrap();
        ids.insert(ctx.header(REQUEST_ID_HEADER).expect("assigned id"));
    }
    assert_eq!(ids.len(), 50);
}

#[tokio::test]
async fn inbound_correlation_id_is_kept() {
    let logger = MemoryLogger::new();
    let svc = InterceptorChain::<String, String>::new()
        .layer(LoggingLayer::new(Arc::new(logger.clone())))
        .layer(CorrelationLayer::new())
        .build(flaky(0, Invocations::default()));

    let inbound = CorrelationId::generate();
    let ctx = CallContext::builder("/svc/M").header("X-Request-Id", inbound.as_str()).build();
    svc.oneshot(Call::new("a".into(), ctx.clone())).await.unwrap();

    assert_eq!(ctx.headers().get_all(REQUEST_ID_HEADER).len(), 1);
    for entry in logger.entries() {
        assert_eq!(entry.correlation_id.as_deref(), Some(inbound.as_str()));
    }
}

#[tokio::test]
async fn forwarding_under_retries_does_not_duplicate() {
    let svc = InterceptorChain::<String, String>::new()
        .layer(RetryLayer::new(instant_retry(3)))
        .layer(ForwardMetadataLayer::default())
        .build(flaky(3, Invocations::default()));

    let ctx = CallContext::builder("/svc/M")
        .header("x-tenant", "blue")
        .header("x-trace", "t1")
        .header("x-trace", "t2")
        .build();
    svc.oneshot(Call::new("a".into(), ctx.clone())).await.unwrap();

    let trailers = ctx.trailers();
    assert_eq!(trailers.len(), 3);
    assert_eq!(trailers.get_all("x-trace"), vec!["t1", "t2"]);
}

#[tokio::test(start_paused = true)]
async fn deadline_cuts_the_backoff_short() {
    let logger = MemoryLogger::new();
    let policy = RetryPolicy::builder()
        .max_retries(10)
        .exponential(Duration::from_secs(1), 2.0)
        .build()
        .unwrap();
    let invocations = Invocations::default();
    let svc = InterceptorChain::<String, String>::new()
        .layer(RetryLayer::new(policy))
        .layer(LoggingLayer::new(Arc::new(logger.clone())))
        .build(flaky(usize::MAX, invocations.clone()));

    let start = Instant::now();
    let ctx = CallContext::builder("/svc/M").deadline(start + Duration::from_millis(2500)).build();
    let err = svc.oneshot(Call::new("a".into(), ctx)).await.unwrap_err();

    assert_eq!(err.code(), Code::DeadlineExceeded);
    // Attempts at t=0s and t=1s; the 2s pause that follows overruns the deadline.
    assert_eq!(invocations.get(), 2);
    assert!(start.elapsed() <= Duration::from_millis(2500));
    assert_eq!(logger.events(CallEvent::Failed).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn deadline_layer_without_retry() {
    let logger = MemoryLogger::new();
    let svc = InterceptorChain::<String, String>::new()
        .layer(DeadlineLayer::new())
        .layer(LoggingLayer::new(Arc::new(logger.clone())))
        .build(handler_fn(|req: String, _ctx: CallContext| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, CallError>(req)
        }));

    let ctx = CallContext::builder("/svc/Slow")
        .deadline(Instant::now() + Duration::from_secs(1))
        .build();
    let err = svc.oneshot(Call::new("a".into(), ctx)).await.unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);

    // The dropped attempt is still logged, as a cancellation.
    let failed = logger.events(CallEvent::Failed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].code, Some(Code::Cancelled));
}

#[tokio::test]
async fn recorded_backoff_follows_policy() {
    let sleeper = RecordingSleeper::new();
    let policy = RetryPolicy::builder()
        .max_retries(4)
        .exponential(Duration::from_millis(10), 3.0)
        .with_sleeper(sleeper.clone())
        .build()
        .unwrap();
    let svc = InterceptorChain::<String, String>::new()
        .layer(RetryLayer::new(policy))
        .build(flaky(usize::MAX, Invocations::default()));

    let _ = svc.oneshot(Call::new("a".into(), CallContext::new("/svc/M"))).await;
    let millis: Vec<u128> = sleeper.delays().iter().map(Duration::as_millis).collect();
    assert_eq!(millis, vec![10, 30, 90, 270]);
}
