//! Per-call `tracing` span.
//!
//! [`CallSpanLayer`] opens an `rpc_call` span carrying the method, the correlation id and the
//! selected inbound headers, then runs the inner call inside it. Events emitted by the handler
//! and by inner interceptors pick up the call's identity without threading a logger through.
//!
//! Place it inside the correlation layer so the id is already assigned when the span opens.

use crate::correlation::CorrelationProvider;
use crate::{Call, CallError};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;
use tracing::instrument::{Instrument, Instrumented};

/// Layer running each call inside a span that identifies it.
#[derive(Debug, Clone)]
pub struct CallSpanLayer {
    correlation: CorrelationProvider,
    headers: Arc<[String]>,
}

impl Default for CallSpanLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl CallSpanLayer {
    pub fn new() -> Self {
        Self { correlation: CorrelationProvider::new(), headers: Arc::from(Vec::new()) }
    }

    /// Read the correlation id from a custom header.
    pub fn correlation(mut self, provider: CorrelationProvider) -> Self {
        self.correlation = provider;
        self
    }

    /// Record these inbound headers (when present) on the span.
    pub fn headers<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.headers = keys.into_iter().map(Into::into).collect();
        self
    }
}

impl<S> Layer<S> for CallSpanLayer {
    type Service = CallSpanService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CallSpanService { inner, layer: self.clone() }
    }
}

#[derive(Debug, Clone)]
pub struct CallSpanService<S> {
    inner: S,
    layer: CallSpanLayer,
}

impl<S, Req> Service<Call<Req>> for CallSpanService<S>
where
    S: Service<Call<Req>, Error = CallError>,
{
    type Response = S::Response;
    type Error = CallError;
    type Future = Instrumented<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        let context = &call.context;
        let correlation_id = self
            .layer
            .correlation
            .extract(context)
            .map(|id| id.into_string())
            .unwrap_or_default();
        let inbound = context.headers();
        let headers: Vec<(&str, &str)> = self
            .layer
            .headers
            .iter()
            .filter_map(|k| inbound.get(k).map(|v| (k.as_str(), v)))
            .collect();
        let span = tracing::info_span!(
            "rpc_call",
            method = %context.method(),
            correlation_id = %correlation_id,
            headers = ?headers,
        );

        // Handlers may log before their first await; enter the span for the synchronous part too.
        let fut = {
            let _entered = span.enter();
            self.inner.call(call)
        };
        fut.instrument(span)
    }
}
