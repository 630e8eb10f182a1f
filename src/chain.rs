//! Interceptor chain composition.
//!
//! An [`InterceptorChain`] is an ordered list of interceptors (tower layers). Building it around
//! a terminal handler is a right fold: the last interceptor wraps the handler first, so the first
//! interceptor added is the outermost one and sees every call first.
//!
//! ```text
//! chain [A, B, C] + handler H  =>  A(B(C(H)))
//! ```
//!
//! Building is purely structural; nothing runs until the composed handler is called.

use crate::{Call, CallError};
use std::fmt;
use std::sync::Arc;
use tower::util::BoxCloneService;
use tower_layer::Layer;
use tower_service::Service;

/// Type-erased unary handler: what an [`InterceptorChain`] produces and each interceptor wraps.
pub type BoxHandler<Req, Resp> = BoxCloneService<Call<Req>, Resp, CallError>;

type Wrap<Req, Resp> = Arc<dyn Fn(BoxHandler<Req, Resp>) -> BoxHandler<Req, Resp> + Send + Sync>;

/// Ordered, statically selected list of interceptors.
pub struct InterceptorChain<Req, Resp> {
    layers: Vec<Wrap<Req, Resp>>,
}

impl<Req, Resp> Clone for InterceptorChain<Req, Resp> {
    fn clone(&self) -> Self {
        Self { layers: self.layers.clone() }
    }
}

impl<Req, Resp> fmt::Debug for InterceptorChain<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain").field("len", &self.layers.len()).finish()
    }
}

impl<Req, Resp> Default for InterceptorChain<Req, Resp> {
    fn default() -> Self {
        Self { layers: Vec::new() }
    }
}

impl<Req, Resp> InterceptorChain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor. It sits inside every interceptor added before it.
    pub fn layer<L>(mut self, layer: L) -> Self
    where
        L: Layer<BoxHandler<Req, Resp>> + Send + Sync + 'static,
        L::Service: Service<Call<Req>, Response = Resp, Error = CallError> + Clone + Send + 'static,
        <L::Service as Service<Call<Req>>>::Future: Send + 'static,
    {
        let wrap: Wrap<Req, Resp> =
            Arc::new(move |inner: BoxHandler<Req, Resp>| BoxCloneService::new(layer.layer(inner)));
        self.layers.push(wrap);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Wrap `handler` with every interceptor, producing one handler of the same signature.
    pub fn build<H>(&self, handler: H) -> BoxHandler<Req, Resp>
    where
        H: Service<Call<Req>, Response = Resp, Error = CallError> + Clone + Send + 'static,
        H::Future: Send + 'static,
    {
        self.layers
            .iter()
            .rev()
            .fold(BoxCloneService::new(handler), |inner, wrap| wrap(inner))
    }
}
