//! Preconfigured interceptor chains.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use ninelives_interceptors::{handler_fn, presets, Call, CallContext, CallError, MemoryLogger};
//! use tower::ServiceExt;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let logger = MemoryLogger::new();
//! let chain = presets::unary_server::<String, String>(Arc::new(logger.clone()));
//! let svc = chain.build(handler_fn(|name: String, _ctx: CallContext| async move {
//!     Ok::<_, CallError>(format!("hello {name}"))
//! }));
//!
//! let ctx = CallContext::new("/greeter/SayHello");
//! let reply = svc.oneshot(Call::new("cat".to_string(), ctx.clone())).await.unwrap();
//! assert_eq!(reply, "hello cat");
//! assert!(ctx.trailers().contains_key("x-request-id"));
//! assert_eq!(logger.len(), 2);
//! # });
//! ```

use crate::correlation::CorrelationProvider;
use crate::{
    CallLogger, CallSpanLayer, CorrelationLayer, ExceptionHandler, ForwardMetadataLayer, InterceptorChain,
    LogExceptionHandler, LoggingLayer, MetadataForwarder, RecoveryLayer, RetryLayer, RetryPolicy,
};
use std::sync::Arc;

/// Inbound headers attached to every log entry of the standard server chain.
pub const DEFAULT_LOGGED_HEADERS: [&str; 3] =
    ["x-ms-correlation-request-id", "x-ms-client-request-id", "x-ms-acs-operation-id"];

/// Standard unary server chain with default options.
///
/// **Layering Order:** Recovery → Retry → Logging → Correlation → Span → Forward → your handler
///
/// - **Recovery:** every failure becomes `Internal`; details go to `tracing::error!`
/// - **Retry:** 3 retries on `Unavailable`/`Aborted`, 100ms backoff growing by 1.5x
/// - **Logging:** start and finish entries with the correlation id to `logger`
/// - **Correlation:** `x-request-id` extracted or generated
/// - **Span:** handler events run in a span with method, correlation id and logged headers
/// - **Forward:** every request header echoed as a response trailer
///
/// Retries re-run everything inside the retry layer, so handlers must tolerate
/// being invoked more than once per call.
pub fn unary_server<Req, Resp>(logger: Arc<dyn CallLogger>) -> InterceptorChain<Req, Resp>
where
    Req: Clone + Send + 'static,
    Resp: Send + 'static,
{
    ServerInterceptors::new(logger).chain()
}

/// Options for the standard server chain.
#[derive(Clone)]
pub struct ServerInterceptors {
    logger: Arc<dyn CallLogger>,
    retry: Option<RetryPolicy>,
    exception_handler: Arc<dyn ExceptionHandler>,
    faults_only: bool,
    correlation: CorrelationProvider,
    forwarder: MetadataForwarder,
    logged_headers: Vec<String>,
}

impl std::fmt::Debug for ServerInterceptors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerInterceptors")
            .field("logger", &self.logger)
            .field("retry", &self.retry)
            .field("faults_only", &self.faults_only)
            .field("correlation", &self.correlation)
            .field("forwarder", &self.forwarder)
            .field("logged_headers", &self.logged_headers)
            .finish_non_exhaustive()
    }
}

impl ServerInterceptors {
    pub fn new(logger: Arc<dyn CallLogger>) -> Self {
        Self {
            logger,
            retry: Some(RetryPolicy::default()),
            exception_handler: Arc::new(LogExceptionHandler),
            faults_only: false,
            correlation: CorrelationProvider::new(),
            forwarder: MetadataForwarder::all(),
            logged_headers: DEFAULT_LOGGED_HEADERS.iter().map(|h| h.to_string()).collect(),
        }
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Leave the retry layer out entirely.
    pub fn without_retry(mut self) -> Self {
        self.retry = None;
        self
    }

    pub fn exception_handler<H: ExceptionHandler + 'static>(mut self, handler: H) -> Self {
        self.exception_handler = Arc::new(handler);
        self
    }

    /// Let status-coded failures through recovery unchanged.
    pub fn recover_faults_only(mut self) -> Self {
        self.faults_only = true;
        self
    }

    pub fn correlation(mut self, provider: CorrelationProvider) -> Self {
        self.correlation = provider;
        self
    }

    pub fn forwarder(mut self, forwarder: MetadataForwarder) -> Self {
        self.forwarder = forwarder;
        self
    }

    pub fn logged_headers<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.logged_headers = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Assemble the chain.
    pub fn chain<Req, Resp>(self) -> InterceptorChain<Req, Resp>
    where
        Req: Clone + Send + 'static,
        Resp: Send + 'static,
    {
        let mut recovery = RecoveryLayer::from_arc(self.exception_handler);
        if self.faults_only {
            recovery = recovery.faults_only();
        }
        let logging = LoggingLayer::new(self.logger)
            .correlation(self.correlation.clone())
            .assign_correlation(true)
            .log_headers(self.logged_headers.clone());
        let span = CallSpanLayer::new()
            .correlation(self.correlation.clone())
            .headers(self.logged_headers);

        let mut chain = InterceptorChain::<Req, Resp>::new().layer(recovery);
        if let Some(policy) = self.retry {
            chain = chain.layer(RetryLayer::new(policy));
        }
        chain
            .layer(logging)
            .layer(CorrelationLayer::with_provider(self.correlation))
            .layer(span)
            .layer(ForwardMetadataLayer::new(self.forwarder))
    }
}
