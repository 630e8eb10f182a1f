//! Echo inbound request metadata back to the caller as response trailers.
//!
//! Forwarding runs once the inner call has finished, on every exit path: success, failure,
//! cancellation, and panic unwinding. Trailers are merged as a set of (key, value) pairs, so
//! forwarding the same headers repeatedly (for example once per retry attempt) never
//! duplicates entries.

use crate::{Call, CallContext, CallError};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Selection {
    All,
    /// (inbound header, trailer key) pairs.
    Only(Vec<(String, String)>),
}

/// Copies selected request headers into response trailers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataForwarder {
    selection: Selection,
}

impl Default for MetadataForwarder {
    fn default() -> Self {
        Self::all()
    }
}

impl MetadataForwarder {
    /// Forward every request header.
    pub fn all() -> Self {
        Self { selection: Selection::All }
    }

    /// Forward only the listed headers, under their own names.
    pub fn only<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let pairs = keys
            .into_iter()
            .map(|k| {
                let k = k.into();
                (k.clone(), k)
            })
            .collect();
        Self { selection: Selection::Only(pairs) }
    }

    /// Forward only the mapped headers, renaming each `(inbound, trailer)` pair on the way out.
    pub fn renamed<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self { selection: Selection::Only(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()) }
    }

    /// Copy the selected headers of `context` into its trailers, skipping empty values. Returns
    /// the number of trailer entries added.
    pub fn forward(&self, context: &CallContext) -> usize {
        let headers = context.headers();
        let mut added = 0;
        match &self.selection {
            Selection::All => {
                for (k, v) in headers.iter().filter(|(_, v)| !v.is_empty()) {
                    added += usize::from(context.append_trailer(k, v));
                }
            }
            Selection::Only(pairs) => {
                for (from, to) in pairs {
                    for v in headers.get_all(from).into_iter().filter(|v| !v.is_empty()) {
                        added += usize::from(context.append_trailer(to.as_str(), v));
                    }
                }
            }
        }
        added
    }
}

/// Layer applying a [`MetadataForwarder`] after the inner call completes.
#[derive(Debug, Clone, Default)]
pub struct ForwardMetadataLayer {
    forwarder: Arc<MetadataForwarder>,
}

impl ForwardMetadataLayer {
    pub fn new(forwarder: MetadataForwarder) -> Self {
        Self { forwarder: Arc::new(forwarder) }
    }
}

impl<S> Layer<S> for ForwardMetadataLayer {
    type Service = ForwardMetadataService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ForwardMetadataService { inner, forwarder: self.forwarder.clone() }
    }
}

#[derive(Debug, Clone)]
pub struct ForwardMetadataService<S> {
    inner: S,
    forwarder: Arc<MetadataForwarder>,
}

/// Forwards when dropped, which covers every way the call future can end.
struct ForwardOnExit {
    forwarder: Arc<MetadataForwarder>,
    context: CallContext,
}

impl Drop for ForwardOnExit {
    fn drop(&mut self) {
        self.forwarder.forward(&self.context);
    }
}

impl<S, Req> Service<Call<Req>> for ForwardMetadataService<S>
where
    S: Service<Call<Req>, Error = CallError>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = CallError;
    type Future = futures::future::BoxFuture<'static, Result<S::Response, CallError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        let guard = ForwardOnExit { forwarder: self.forwarder.clone(), context: call.context.clone() };
        let fut = self.inner.call(call);
        Box::pin(async move {
            let result = fut.await;
            drop(guard);
            result
        })
    }
}
