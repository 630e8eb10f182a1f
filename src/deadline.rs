//! Enforcement of the per-call deadline carried by [`CallContext`].
//!
//! [`within_deadline`] races a future against the call deadline and drops it when the deadline
//! passes. The retry interceptor uses it for both attempts and backoff sleeps; [`DeadlineLayer`]
//! applies it to a whole inner chain when no retry layer is present.

use crate::{Call, CallContext, CallError, Status};
use futures::future::BoxFuture;
use std::future::Future;
use std::task::{Context, Poll};
use tokio::time::Instant;
use tower_layer::Layer;
use tower_service::Service;

/// The call deadline passed before the future completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("call deadline exceeded")]
pub struct DeadlineElapsed;

impl From<DeadlineElapsed> for CallError {
    fn from(_: DeadlineElapsed) -> Self {
        CallError::Status(Status::deadline_exceeded("call deadline exceeded"))
    }
}

/// Run `fut` until it completes or `deadline` passes. No deadline means no limit.
pub async fn within_deadline<F>(deadline: Option<Instant>, fut: F) -> Result<F::Output, DeadlineElapsed>
where
    F: Future,
{
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut).await.map_err(|_| DeadlineElapsed),
        None => Ok(fut.await),
    }
}

/// True if the context carries a deadline that has already passed.
pub fn is_expired(context: &CallContext) -> bool {
    has_passed(context.deadline())
}

pub(crate) fn has_passed(deadline: Option<Instant>) -> bool {
    deadline.map(|at| Instant::now() >= at).unwrap_or(false)
}

/// Layer that fails calls with `DeadlineExceeded` once the context deadline passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeadlineLayer;

impl DeadlineLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for DeadlineLayer {
    type Service = DeadlineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DeadlineService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct DeadlineService<S> {
    inner: S,
}

impl<S, Req> Service<Call<Req>> for DeadlineService<S>
where
    S: Service<Call<Req>, Error = CallError>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = CallError;
    type Future = BoxFuture<'static, Result<S::Response, CallError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        if is_expired(&call.context) {
            return Box::pin(async { Err(DeadlineElapsed.into()) });
        }
        let deadline = call.context.deadline();
        let fut = self.inner.call(call);
        Box::pin(async move { within_deadline(deadline, fut).await? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{handler_fn, Code};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test(start_paused = true)]
    async fn slow_handler_is_cut_off_at_deadline() {
        let svc = DeadlineLayer::new().layer(handler_fn(|_: (), _ctx| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, CallError>("late")
        }));
        let ctx = CallContext::builder("/svc/Slow")
            .deadline(Instant::now() + Duration::from_millis(50))
            .build();

        let start = Instant::now();
        let err = svc.oneshot(Call::new((), ctx)).await.unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_skips_the_handler() {
        let invoked = Arc::new(AtomicUsize::new(0));
        let seen = invoked.clone();
        let svc = DeadlineLayer::new().layer(handler_fn(move |_: (), _ctx| {
            seen.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, CallError>(()) }
        }));
        let ctx = CallContext::builder("/svc/Late").deadline(Instant::now()).build();
        tokio::time::advance(Duration::from_secs(1)).await;

        let err = svc.oneshot(Call::new((), ctx)).await.unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn calls_without_deadline_are_untouched() {
        let svc = DeadlineLayer::new().layer(handler_fn(|n: u32, _ctx| async move { Ok::<_, CallError>(n * 2) }));
        let out = svc.oneshot(Call::new(21, CallContext::new("/svc/Double"))).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_check_uses_runtime_clock() {
        let ctx = CallContext::builder("/svc/M")
            .deadline(Instant::now() + Duration::from_millis(10))
            .build();
        assert!(!is_expired(&ctx));
        tokio::time::advance(Duration::from_millis(11)).await;
        assert!(is_expired(&ctx));
        assert!(!is_expired(&CallContext::new("/svc/M")));
    }
}
