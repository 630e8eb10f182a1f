//! Recovery interceptor: turn any failure, panics included, into a safe `Internal` status.
//!
//! The outermost layer of a chain. The original failure (message and cause) goes to an
//! [`ExceptionHandler`] for the operator and is never returned to the caller.

use crate::{Call, CallError, Fault, Status};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Message returned to callers in place of any recovered failure.
pub const INTERNAL_ERROR_MESSAGE: &str = "an internal server error occurred";

/// Side-effecting callback that receives recovered failures.
///
/// Any `Fn(&CallError) + Send + Sync` closure is an exception handler.
pub trait ExceptionHandler: Send + Sync {
    fn handle(&self, failure: &CallError);
}

impl<F> ExceptionHandler for F
where
    F: Fn(&CallError) + Send + Sync,
{
    fn handle(&self, failure: &CallError) {
        self(failure)
    }
}

/// Default handler: reports the failure with `tracing::error!`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogExceptionHandler;

impl ExceptionHandler for LogExceptionHandler {
    fn handle(&self, failure: &CallError) {
        let cause = failure.cause().map(|c| c.to_string());
        tracing::error!(
            code = %failure.code(),
            fault = failure.is_fault(),
            cause = cause.as_deref().unwrap_or(""),
            "recovered from call failure: {}",
            failure
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mask {
    All,
    FaultsOnly,
}

/// Tower layer for [`RecoveryService`].
#[derive(Clone)]
pub struct RecoveryLayer {
    handler: Arc<dyn ExceptionHandler>,
    mask: Mask,
}

impl fmt::Debug for RecoveryLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryLayer").field("mask", &self.mask).finish_non_exhaustive()
    }
}

impl Default for RecoveryLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryLayer {
    /// Recovery reporting through [`LogExceptionHandler`].
    pub fn new() -> Self {
        Self::with_handler(LogExceptionHandler)
    }

    pub fn with_handler<H: ExceptionHandler + 'static>(handler: H) -> Self {
        Self::from_arc(Arc::new(handler))
    }

    /// Share an existing handler between several layers.
    pub fn from_arc(handler: Arc<dyn ExceptionHandler>) -> Self {
        Self { handler, mask: Mask::All }
    }

    /// Mask only faults and panics. Status-coded failures pass through unchanged and are not
    /// reported to the handler.
    pub fn faults_only(mut self) -> Self {
        self.mask = Mask::FaultsOnly;
        self
    }
}

impl<S> Layer<S> for RecoveryLayer {
    type Service = RecoveryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoveryService { inner, handler: self.handler.clone(), mask: self.mask }
    }
}

#[derive(Clone)]
pub struct RecoveryService<S> {
    inner: S,
    handler: Arc<dyn ExceptionHandler>,
    mask: Mask,
}

impl<S: fmt::Debug> fmt::Debug for RecoveryService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryService")
            .field("inner", &self.inner)
            .field("mask", &self.mask)
            .finish_non_exhaustive()
    }
}

fn recover(handler: &dyn ExceptionHandler, mask: Mask, failure: CallError) -> CallError {
    if mask == Mask::FaultsOnly && !failure.is_fault() {
        return failure;
    }
    if catch_unwind(AssertUnwindSafe(|| handler.handle(&failure))).is_err() {
        tracing::error!("exception handler panicked");
    }
    Status::internal(INTERNAL_ERROR_MESSAGE).into()
}

impl<S, Req> Service<Call<Req>> for RecoveryService<S>
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
        let handler = self.handler.clone();
        let mask = self.mask;
        let fut = match catch_unwind(AssertUnwindSafe(|| self.inner.call(call))) {
            Ok(fut) => fut,
            Err(payload) => {
                let failure = CallError::from(Fault::from_panic(payload));
                let err = recover(handler.as_ref(), mask, failure);
                return Box::pin(async move { Err(err) });
            }
        };
        Box::pin(async move {
            let outcome = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(Fault::from_panic(payload).into()),
            };
            outcome.map_err(|failure| recover(handler.as_ref(), mask, failure))
        })
    }
}
