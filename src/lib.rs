#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Nine Lives Interceptors
//!
//! Composable interceptors for unary RPC handlers, built as `tower` layers.
//!
//! ## Features
//!
//! - **Interceptor chains** composed as a right fold around a terminal handler
//! - **Request correlation** via the `x-request-id` header, generated when absent
//! - **Structured call logging** with one start and one terminal entry per invocation
//! - **Call spans** tagging handler events with method and correlation id
//! - **Retry** on transient status codes with exponential backoff and deadline-aware sleeps
//! - **Recovery** that turns failures and panics into a safe `Internal` status
//! - **Metadata forwarding** of request headers into response trailers
//!
//! ## Quick Start
//!
//! ```rust
//! use ninelives_interceptors::prelude::*;
//! use std::time::Duration;
//! use tower::ServiceExt;
//!
//! #[tokio::main]
//! async fn main() {
//!     let policy = RetryPolicy::builder()
//!         .max_retries(3)
//!         .exponential(Duration::from_millis(100), 1.5)
//!         .build()
//!         .unwrap();
//!
//!     let chain = InterceptorChain::<String, String>::new()
//!         .layer(RecoveryLayer::new())
//!         .layer(RetryLayer::new(policy))
//!         .layer(LoggingLayer::tracing())
//!         .layer(CorrelationLayer::new())
//!         .layer(ForwardMetadataLayer::default());
//!
//!     let svc = chain.build(handler_fn(|req: String, _ctx: CallContext| async move {
//!         Ok::<_, CallError>(req.to_uppercase())
//!     }));
//!
//!     let ctx = CallContext::builder("/echo.Echo/Shout").header("x-request-id", "r-1").build();
//!     let reply = svc.oneshot(Call::new("hi".to_string(), ctx.clone())).await.unwrap();
//!     assert_eq!(reply, "HI");
//!     assert_eq!(ctx.trailers().get("x-request-id"), Some("r-1"));
//! }
//! ```

pub mod backoff;
pub mod chain;
#[cfg(feature = "serde")]
pub mod config;
pub mod context;
pub mod correlation;
pub mod deadline;
pub mod error;
pub mod forward;
pub mod handler;
pub mod jitter;
pub mod logging;
pub mod prelude;
pub mod presets;
pub mod recovery;
pub mod retry;
pub mod sleeper;
pub mod span;

// Re-exports
pub use backoff::{Backoff, BackoffError, MAX_BACKOFF};
pub use chain::{BoxHandler, InterceptorChain};
#[cfg(feature = "serde")]
pub use config::RetryConfig;
pub use context::{Call, CallContext, CallContextBuilder, Metadata};
pub use correlation::{
    CorrelationId, CorrelationLayer, CorrelationProvider, CorrelationService, REQUEST_ID_HEADER,
};
pub use deadline::{within_deadline, DeadlineElapsed, DeadlineLayer, DeadlineService};
pub use error::{CallError, Cause, Code, Fault, Status};
pub use forward::{ForwardMetadataLayer, ForwardMetadataService, MetadataForwarder};
pub use handler::{handler_fn, HandlerFn};
pub use jitter::Jitter;
pub use logging::{
    CallEvent, CallLogger, LogEntry, LoggingLayer, LoggingService, MemoryLogger, TracingLogger,
};
pub use recovery::{
    ExceptionHandler, LogExceptionHandler, RecoveryLayer, RecoveryService, INTERNAL_ERROR_MESSAGE,
};
pub use retry::{BuildError, RetryLayer, RetryPolicy, RetryPolicyBuilder, RetryService};
pub use sleeper::{InstantSleeper, RecordingSleeper, Sleeper, TokioSleeper};
pub use span::{CallSpanLayer, CallSpanService};
