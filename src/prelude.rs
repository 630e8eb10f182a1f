//! Convenient re-exports for building interceptor chains.
pub use crate::{
    backoff::{Backoff, BackoffError},
    chain::{BoxHandler, InterceptorChain},
    context::{Call, CallContext, Metadata},
    correlation::{CorrelationLayer, CorrelationProvider, REQUEST_ID_HEADER},
    deadline::DeadlineLayer,
    error::{CallError, Code, Fault, Status},
    forward::{ForwardMetadataLayer, MetadataForwarder},
    handler::handler_fn,
    jitter::Jitter,
    logging::{CallLogger, LoggingLayer, MemoryLogger, TracingLogger},
    recovery::{ExceptionHandler, RecoveryLayer},
    retry::{BuildError, RetryLayer, RetryPolicy},
    sleeper::{InstantSleeper, Sleeper, TokioSleeper},
    span::CallSpanLayer,
};
