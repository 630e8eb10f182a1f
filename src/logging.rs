//! Call logging.
//!
//! [`LoggingLayer`] writes one `Started` entry before invoking the inner handler and exactly one
//! terminal entry (`Succeeded` or `Failed`) afterwards. It only observes: the inner result is
//! returned unchanged.
//!
//! Entries go to a [`CallLogger`], the structured sink the interceptor borrows but never owns.
//! [`TracingLogger`] forwards entries to `tracing`; [`MemoryLogger`] keeps them for inspection.

use crate::correlation::CorrelationProvider;
use crate::{Call, CallContext, CallError, Code};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tower_layer::Layer;
use tower_service::Service;
use tracing::Level;

/// Lifecycle point a [`LogEntry`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    Started,
    Succeeded,
    Failed,
}

impl fmt::Display for CallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallEvent::Started => "started call",
            CallEvent::Succeeded => "finished call",
            CallEvent::Failed => "failed call",
        };
        f.write_str(s)
    }
}

/// One structured log record produced by [`LoggingLayer`].
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub level: Level,
    pub event: CallEvent,
    pub method: String,
    pub correlation_id: Option<String>,
    /// Extra inbound headers selected with [`LoggingLayer::log_headers`].
    pub headers: Vec<(String, String)>,
    /// `Ok` for successes, the failure's code otherwise. `None` on start entries.
    pub code: Option<Code>,
    pub error: Option<String>,
    /// Underlying error attached to the failure, if any.
    pub cause: Option<String>,
    pub elapsed: Option<Duration>,
}

/// Structured sink for call log entries.
pub trait CallLogger: Send + Sync + fmt::Debug {
    fn log(&self, entry: LogEntry);
}

/// Writes entries as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

macro_rules! emit {
    ($level:expr, $entry:expr, $headers:expr, $elapsed:expr) => {
        tracing::event!(
            target: "ninelives_interceptors::call",
            $level,
            method = %$entry.method,
            correlation_id = $entry.correlation_id.as_deref().unwrap_or(""),
            headers = ?$headers,
            code = $entry.code.map(|c| c.as_str()).unwrap_or(""),
            error = $entry.error.as_deref().unwrap_or(""),
            cause = $entry.cause.as_deref().unwrap_or(""),
            elapsed_ms = $elapsed,
            "{}",
            $entry.event
        )
    };
}

impl CallLogger for TracingLogger {
    fn log(&self, entry: LogEntry) {
        let headers = &entry.headers;
        let elapsed = entry.elapsed.map(|d| d.as_secs_f64() * 1000.0).unwrap_or(0.0);
        let level = entry.level;
        if level == Level::ERROR {
            emit!(Level::ERROR, entry, headers, elapsed)
        } else if level == Level::WARN {
            emit!(Level::WARN, entry, headers, elapsed)
        } else if level == Level::INFO {
            emit!(Level::INFO, entry, headers, elapsed)
        } else if level == Level::DEBUG {
            emit!(Level::DEBUG, entry, headers, elapsed)
        } else {
            emit!(Level::TRACE, entry, headers, elapsed)
        }
    }
}

/// Keeps entries in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Entries for one lifecycle point.
    pub fn events(&self, event: CallEvent) -> Vec<LogEntry> {
        self.entries().into_iter().filter(|e| e.event == event).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl CallLogger for MemoryLogger {
    fn log(&self, entry: LogEntry) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
    }
}

/// Logging interceptor.
#[derive(Debug, Clone)]
pub struct LoggingLayer {
    logger: Arc<dyn CallLogger>,
    correlation: CorrelationProvider,
    assign_correlation: bool,
    headers: Arc<[String]>,
}

impl LoggingLayer {
    pub fn new(logger: Arc<dyn CallLogger>) -> Self {
        Self {
            logger,
            correlation: CorrelationProvider::new(),
            assign_correlation: false,
            headers: Arc::from(Vec::new()),
        }
    }

    /// Logging layer writing to `tracing`.
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingLogger))
    }

    /// Use a custom correlation header.
    pub fn correlation(mut self, provider: CorrelationProvider) -> Self {
        self.correlation = provider;
        self
    }

    /// Assign a correlation id before the start entry when the call has none, so even the
    /// first entry of a call carries one.
    pub fn assign_correlation(mut self, assign: bool) -> Self {
        self.assign_correlation = assign;
        self
    }

    /// Attach these inbound headers (when present) to every entry.
    pub fn log_headers<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.headers = keys.into_iter().map(Into::into).collect();
        self
    }
}

impl<S> Layer<S> for LoggingLayer {
    type Service = LoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingService { inner, layer: self.clone() }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingService<S> {
    inner: S,
    layer: LoggingLayer,
}

/// Per-call logging state. Writes the terminal entry exactly once, including when the call
/// future is dropped early (deadline) or unwound by a panic.
struct CallLog {
    logger: Arc<dyn CallLogger>,
    correlation: CorrelationProvider,
    context: CallContext,
    method: String,
    correlation_id: Option<String>,
    headers: Vec<(String, String)>,
    started: Instant,
    finished: bool,
}

impl CallLog {
    fn entry(&self, level: Level, event: CallEvent) -> LogEntry {
        LogEntry {
            level,
            event,
            method: self.method.clone(),
            correlation_id: self.correlation_id.clone(),
            headers: self.headers.clone(),
            code: None,
            error: None,
            cause: None,
            elapsed: None,
        }
    }

    fn finish<T>(&mut self, result: &Result<T, CallError>) {
        // Pick up an id assigned further down the chain during this attempt.
        if self.correlation_id.is_none() {
            self.correlation_id = self.correlation.extract(&self.context).map(|id| id.into_string());
        }
        let elapsed = Some(self.started.elapsed());
        let entry = match result {
            Ok(_) => LogEntry {
                code: Some(Code::Ok),
                elapsed,
                ..self.entry(Level::INFO, CallEvent::Succeeded)
            },
            Err(err) => LogEntry {
                code: Some(err.code()),
                error: Some(err.to_string()),
                cause: err.cause().map(|c| c.to_string()),
                elapsed,
                ..self.entry(err.log_level(), CallEvent::Failed)
            },
        };
        self.finished = true;
        self.logger.log(entry);
    }
}

impl Drop for CallLog {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let outcome: Result<(), CallError> = if std::thread::panicking() {
            Err(CallError::fault("handler panicked"))
        } else {
            Err(CallError::status(Code::Cancelled, "call abandoned before completion"))
        };
        self.finish(&outcome);
    }
}

impl<S, Req> Service<Call<Req>> for LoggingService<S>
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
        let layer = &self.layer;
        let context = call.context.clone();
        let correlation_id = if layer.assign_correlation {
            Some(layer.correlation.resolve(&context).into_string())
        } else {
            layer.correlation.extract(&context).map(|id| id.into_string())
        };
        let inbound = context.headers();
        let headers = layer
            .headers
            .iter()
            .filter_map(|k| inbound.get(k).map(|v| (k.clone(), v.to_owned())))
            .collect();

        let mut log = CallLog {
            logger: layer.logger.clone(),
            correlation: layer.correlation.clone(),
            method: context.method().to_owned(),
            context,
            correlation_id,
            headers,
            started: Instant::now(),
            finished: false,
        };
        layer.logger.log(log.entry(Level::INFO, CallEvent::Started));

        let fut = self.inner.call(call);
        Box::pin(async move {
            let result = fut.await;
            log.finish(&result);
            result
        })
    }
}
