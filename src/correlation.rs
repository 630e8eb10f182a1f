//! Request correlation: extract or assign the `x-request-id` of a call.
//!
//! The id is stored in the call's request headers, so every interceptor, every retry attempt,
//! and the handler observe the same value.

use crate::{Call, CallContext, CallError};
use std::fmt;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;
use uuid::Uuid;

/// Header carrying the request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Opaque, non-empty identifier tying together all log entries of one call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Fresh random (UUID v4) id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Looks up, and if necessary assigns, the correlation id of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationProvider {
    header: String,
}

impl Default for CorrelationProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationProvider {
    /// Provider using the standard `x-request-id` header.
    pub fn new() -> Self {
        Self::with_header(REQUEST_ID_HEADER)
    }

    pub fn with_header(header: impl Into<String>) -> Self {
        Self { header: header.into() }
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    /// Inbound (or previously assigned) id, if any. Empty values do not count.
    pub fn extract(&self, context: &CallContext) -> Option<CorrelationId> {
        context
            .headers()
            .get_all(&self.header)
            .into_iter()
            .find(|v| !v.is_empty())
            .map(|v| CorrelationId(v.to_owned()))
    }

    /// Existing id, or a freshly generated one that is inserted into the request headers.
    ///
    /// Idempotent for a given call.
    pub fn resolve(&self, context: &CallContext) -> CorrelationId {
        CorrelationId(
            context.header_or_insert_with(&self.header, || CorrelationId::generate().into_string()),
        )
    }
}

/// Layer that makes sure every call carries a correlation id before reaching the handler.
#[derive(Debug, Clone, Default)]
pub struct CorrelationLayer {
    provider: CorrelationProvider,
}

impl CorrelationLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(provider: CorrelationProvider) -> Self {
        Self { provider }
    }
}

impl<S> Layer<S> for CorrelationLayer {
    type Service = CorrelationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationService { inner, provider: self.provider.clone() }
    }
}

#[derive(Debug, Clone)]
pub struct CorrelationService<S> {
    inner: S,
    provider: CorrelationProvider,
}

impl<S, Req> Service<Call<Req>> for CorrelationService<S>
where
    S: Service<Call<Req>, Error = CallError>,
{
    type Response = S::Response;
    type Error = CallError;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        self.provider.resolve(&call.context);
        self.inner.call(call)
    }
}
