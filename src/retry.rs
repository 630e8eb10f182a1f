//! Retry interceptor.
//!
//! Semantics:
//! - `max_retries` counts re-invocations; total attempts never exceed `max_retries + 1`.
//! - Only status-coded failures whose code is in the retryable set are retried. Faults and
//!   other codes return immediately.
//! - When retries run out, the *last* failure is returned unchanged.
//! - The pause before retry `n + 1` is `backoff.delay(n)`, optionally jittered, and goes
//!   through the configured [`Sleeper`].
//! - If the call deadline passes during an attempt or a pause, the attempt or pause is
//!   dropped and `DeadlineExceeded` is returned. No attempt starts once the deadline has passed.
//!
//! Every retry re-invokes the whole inner chain, handler included. The wrapped handler must be
//! safe to run more than once for the same request (idempotent, or free of side effects when it
//! fails); this layer cannot check that.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use ninelives_interceptors::{Backoff, Code, RetryPolicy};
//!
//! let policy = RetryPolicy::builder()
//!     .max_retries(3)
//!     .backoff(Backoff::exponential(Duration::from_millis(100)))
//!     .retry_on([Code::Unavailable, Code::Aborted])
//!     .build()
//!     .unwrap();
//! assert_eq!(policy.delay(1), Duration::from_millis(150));
//! ```

use crate::deadline::{has_passed, within_deadline, DeadlineElapsed};
use crate::{Backoff, Call, CallError, Code, Jitter, Sleeper, TokioSleeper};
use futures::future::BoxFuture;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
pub const DEFAULT_RETRYABLE_CODES: [Code; 2] = [Code::Unavailable, Code::Aborted];

/// Immutable retry configuration, shared read-only by every call.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    retryable: BTreeSet<Code>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("retryable", &self.retryable)
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::exponential(DEFAULT_INITIAL_BACKOFF),
            jitter: Jitter::None,
            retryable: DEFAULT_RETRYABLE_CODES.into_iter().collect(),
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn retryable_codes(&self) -> impl Iterator<Item = Code> + '_ {
        self.retryable.iter().copied()
    }

    /// True if `error` may be retried: a status whose code is in the retryable set.
    pub fn is_retryable(&self, error: &CallError) -> bool {
        match error {
            CallError::Status(s) => self.retryable.contains(&s.code()),
            CallError::Fault(_) => false,
        }
    }

    /// Pause before retry `retry + 1`, before jitter.
    pub fn delay(&self, retry: usize) -> Duration {
        self.backoff.delay(retry)
    }

    fn jittered_delay(&self, retry: usize) -> Duration {
        self.jitter.apply(self.backoff.delay(retry))
    }
}

/// Errors produced while building a retry policy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("invalid backoff: {0}")]
    Backoff(#[from] crate::backoff::BackoffError),
    #[error("retryable code set must not contain OK")]
    OkIsNotAFailure,
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
    multiplier: Option<f64>,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicyBuilder {
    /// Defaults: 3 retries, 100ms initial backoff growing by 1.5x, no jitter, retry on
    /// `Unavailable` and `Aborted`.
    pub fn new() -> Self {
        Self { policy: RetryPolicy::default(), multiplier: None }
    }

    /// Number of retries after the first attempt. Zero disables retrying.
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.policy.max_retries = retries;
        self
    }

    pub fn backoff<B: Into<Backoff>>(mut self, backoff: B) -> Self {
        self.policy.backoff = backoff.into();
        self.multiplier = None;
        self
    }

    /// Shorthand for `initial * multiplier^n` exponential backoff.
    pub fn exponential(mut self, initial: Duration, multiplier: f64) -> Self {
        self.policy.backoff = Backoff::exponential(initial);
        self.multiplier = Some(multiplier);
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.policy.jitter = jitter;
        self
    }

    /// Replace the retryable code set.
    pub fn retry_on<I: IntoIterator<Item = Code>>(mut self, codes: I) -> Self {
        self.policy.retryable = codes.into_iter().collect();
        self
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.policy.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> Result<RetryPolicy, BuildError> {
        let mut policy = self.policy;
        if policy.retryable.contains(&Code::Ok) {
            return Err(BuildError::OkIsNotAFailure);
        }
        if let Some(m) = self.multiplier {
            policy.backoff = policy.backoff.with_multiplier(m)?;
        }
        Ok(policy)
    }
}

/// Tower layer applying a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryLayer {
    policy: Arc<RetryPolicy>,
}

impl RetryLayer {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy: Arc::new(policy) }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl Default for RetryLayer {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService { inner, policy: self.policy.clone() }
    }
}

/// Retry service produced by [`RetryLayer`].
#[derive(Debug, Clone)]
pub struct RetryService<S> {
    inner: S,
    policy: Arc<RetryPolicy>,
}

impl<S, Req> Service<Call<Req>> for RetryService<S>
where
    Req: Clone + Send + 'static,
    S: Service<Call<Req>, Error = CallError> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = CallError;
    type Future = BoxFuture<'static, Result<S::Response, CallError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        // Take the service that was driven to readiness and leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let policy = self.policy.clone();

        Box::pin(async move {
            let deadline = call.context.deadline();
            let mut retry = 0;
            loop {
                if has_passed(deadline) {
                    return Err(DeadlineElapsed.into());
                }
                let next = call.clone();
                let attempt = async {
                    let svc = inner.ready().await?;
                    svc.call(next).await
                };
                let err = match within_deadline(deadline, attempt).await? {
                    Ok(resp) => return Ok(resp),
                    Err(err) => err,
                };

                if !policy.is_retryable(&err) {
                    return Err(err);
                }
                if retry >= policy.max_retries {
                    tracing::warn!(
                        method = %call.context.method(),
                        attempts = retry + 1,
                        code = %err.code(),
                        "retries exhausted"
                    );
                    return Err(err);
                }

                let delay = policy.jittered_delay(retry);
                tracing::debug!(
                    method = %call.context.method(),
                    attempt = retry + 1,
                    code = %err.code(),
                    delay_ms = delay.as_millis() as u64,
                    "retrying call"
                );
                within_deadline(deadline, policy.sleeper.sleep(delay)).await?;
                retry += 1;
            }
        })
    }
}
