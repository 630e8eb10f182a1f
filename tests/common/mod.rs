#![allow(dead_code)]

use ninelives_interceptors::{handler_fn, Call, CallContext, CallError, Status};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::util::BoxCloneService;

pub type Handler = BoxCloneService<Call<String>, String, CallError>;

/// Counts handler invocations.
#[derive(Clone, Default)]
pub struct Invocations(Arc<AtomicUsize>);

impl Invocations {
    pub fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handler that fails with `Unavailable` `failures` times, then echoes the request.
pub fn flaky(failures: usize, invocations: Invocations) -> Handler {
    BoxCloneService::new(handler_fn(move |req: String, _ctx: CallContext| {
        let n = invocations.bump();
        async move {
            if n < failures {
                Err(CallError::from(Status::unavailable(format!("backend down ({n})"))))
            } else {
                Ok(format!("echo: {req}"))
            }
        }
    }))
}

/// Handler that always returns a fault carrying `detail`.
pub fn faulty(detail: &'static str, invocations: Invocations) -> Handler {
    BoxCloneService::new(handler_fn(move |_: String, _ctx: CallContext| {
        invocations.bump();
        async move { Err::<String, _>(CallError::fault(detail)) }
    }))
}

/// Exception handler that records every failure it sees.
#[derive(Clone, Default)]
pub struct SeenFailures(Arc<Mutex<Vec<CallError>>>);

impl SeenFailures {
    pub fn handler(&self) -> impl Fn(&CallError) + Send + Sync + 'static {
        let seen = self.0.clone();
        move |err: &CallError| seen.lock().unwrap().push(err.clone())
    }

    pub fn all(&self) -> Vec<CallError> {
        self.0.lock().unwrap().clone()
    }
}
