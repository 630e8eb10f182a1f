//! Terminal handlers: the business logic an interceptor chain wraps.

use crate::{Call, CallContext, CallError};
use std::future::Future;
use std::task::{Context, Poll};
use tower_service::Service;

/// A unary handler built from an async function of `(request, context)`.
///
/// Created with [`handler_fn`].
#[derive(Clone, Copy)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F> std::fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerFn").field("f", &std::any::type_name::<F>()).finish()
    }
}

/// Adapt an async `(Req, CallContext) -> Result<Resp, CallError>` function into a handler
/// service that an [`InterceptorChain`](crate::InterceptorChain) can wrap.
///
/// ```rust
/// use ninelives_interceptors::{handler_fn, Call, CallContext, CallError};
/// use tower::ServiceExt;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let greet = handler_fn(|name: String, ctx: CallContext| async move {
///     Ok::<_, CallError>(format!("hello {name} via {}", ctx.method()))
/// });
/// let reply = greet
///     .oneshot(Call::new("cat".to_string(), CallContext::new("/greeter/SayHello")))
///     .await
///     .unwrap();
/// assert_eq!(reply, "hello cat via /greeter/SayHello");
/// # });
/// ```
pub fn handler_fn<F, Fut, Req, Resp>(f: F) -> HandlerFn<F>
where
    F: FnMut(Req, CallContext) -> Fut,
    Fut: Future<Output = Result<Resp, CallError>>,
{
    HandlerFn { f }
}

impl<F, Fut, Req, Resp> Service<Call<Req>> for HandlerFn<F>
where
    F: FnMut(Req, CallContext) -> Fut,
    Fut: Future<Output = Result<Resp, CallError>>,
{
    type Response = Resp;
    type Error = CallError;
    type Future = Fut;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: Call<Req>) -> Self::Future {
        (self.f)(call.request, call.context)
    }
}
