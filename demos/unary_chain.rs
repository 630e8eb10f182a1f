//! A unary handler wrapped in the standard server interceptor chain.
//!
//! Runs three calls against a flaky inventory handler and prints what the caller sees.
//! Log entries go to stdout through `tracing-subscriber`.

use ninelives_interceptors::presets::ServerInterceptors;
use ninelives_interceptors::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).with_target(false).init();

    println!("=== Nine Lives Interceptors: unary chain ===\n");

    let policy = RetryPolicy::builder()
        .max_retries(3)
        .exponential(Duration::from_millis(50), 1.5)
        .build()?;
    let chain = ServerInterceptors::new(Arc::new(TracingLogger))
        .retry(policy)
        .chain::<String, u32>();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let svc = chain.build(handler_fn(move |sku: String, _ctx: CallContext| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            match sku.as_str() {
                // Fails twice with a transient code before answering.
                "flaky" if n < 2 => Err(CallError::from(Status::unavailable("warehouse offline"))),
                "missing" => Err(CallError::from(Status::new(Code::NotFound, "no such sku"))),
                "broken" => Err(CallError::fault("stock table index corrupted")),
                _ => Ok(42),
            }
        }
    }));

    for sku in ["flaky", "missing", "broken"] {
        let ctx = CallContext::builder("/inventory.Inventory/Stock")
            .header("x-ms-client-request-id", format!("client-{sku}"))
            .build();
        let outcome = svc.clone().oneshot(Call::new(sku.to_string(), ctx.clone())).await;
        println!("{sku:>8}: {outcome:?}");
        for (k, v) in ctx.trailers().iter() {
            println!("          trailer {k} = {v}");
        }
    }

    println!("\nhandler invocations: {}", calls.load(Ordering::SeqCst));
    Ok(())
}
