//! Per-call context: method identity, inbound headers, outbound trailers, and deadline.
//!
//! A [`CallContext`] is cheap to clone. All clones made for one call share the same header and
//! trailer storage, so a value inserted by one interceptor (for example a generated request id)
//! is seen by every later retry attempt and by the caller after the chain returns. The storage
//! is never shared between calls.
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;

/// Ordered, multi-valued metadata map.
///
/// Keys are matched ASCII case-insensitively but stored with the case they were inserted with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, keeping any existing values for the same key.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Append an entry unless the exact (key, value) pair is already present.
    ///
    /// Returns `true` if the entry was added.
    pub fn append_unique(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        let value = value.into();
        if self.contains(&key, &value) {
            return false;
        }
        self.entries.push((key, value));
        true
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v.as_str())
    }

    /// All values stored under `key`, in insertion order.
    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.entries.iter().any(|(k, v)| k.eq_ignore_ascii_case(key) && v == value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Metadata
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut md = Metadata::new();
        for (k, v) in iter {
            md.append(k, v);
        }
        md
    }
}

struct Shared {
    method: String,
    headers: Mutex<Metadata>,
    trailers: Mutex<Metadata>,
    deadline: Option<Instant>,
}

fn lock(m: &Mutex<Metadata>) -> MutexGuard<'_, Metadata> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Context of one unary call, produced by the RPC runtime.
#[derive(Clone)]
pub struct CallContext {
    shared: Arc<Shared>,
}

impl CallContext {
    pub fn new(method: impl Into<String>) -> Self {
        Self::builder(method).build()
    }

    pub fn builder(method: impl Into<String>) -> CallContextBuilder {
        CallContextBuilder { method: method.into(), headers: Metadata::new(), deadline: None }
    }

    /// Fully qualified method name, e.g. `/greeter.v1.Greeter/SayHello`.
    pub fn method(&self) -> &str {
        &self.shared.method
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.shared.deadline
    }

    /// First inbound value for `key`.
    pub fn header(&self, key: &str) -> Option<String> {
        lock(&self.shared.headers).get(key).map(str::to_owned)
    }

    /// Snapshot of the inbound headers.
    pub fn headers(&self) -> Metadata {
        lock(&self.shared.headers).clone()
    }

    /// Return the first non-empty value for `key`, or append the one produced by `make` and
    /// return it.
    ///
    /// Check and insert happen under one lock, so concurrent callers on the same call agree on
    /// a single value.
    pub fn header_or_insert_with<F>(&self, key: &str, make: F) -> String
    where
        F: FnOnce() -> String,
    {
        let mut headers = lock(&self.shared.headers);
        if let Some(existing) = headers.get_all(key).into_iter().find(|v| !v.is_empty()) {
            return existing.to_owned();
        }
        let value = make();
        headers.append(key, value.clone());
        value
    }

    /// Snapshot of the outbound trailers.
    pub fn trailers(&self) -> Metadata {
        lock(&self.shared.trailers).clone()
    }

    /// Append a trailer unless the same (key, value) pair was already added.
    pub fn append_trailer(&self, key: impl Into<String>, value: impl Into<String>) -> bool {
        lock(&self.shared.trailers).append_unique(key, value)
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("method", &self.shared.method)
            .field("headers", &self.headers())
            .field("trailers", &self.trailers())
            .field("deadline", &self.shared.deadline)
            .finish()
    }
}

/// Builder for [`CallContext`], used by runtimes and tests.
#[derive(Debug, Clone)]
pub struct CallContextBuilder {
    method: String,
    headers: Metadata,
    deadline: Option<Instant>,
}

impl CallContextBuilder {
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    pub fn headers(mut self, headers: Metadata) -> Self {
        self.headers = headers;
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn build(self) -> CallContext {
        CallContext {
            shared: Arc::new(Shared {
                method: self.method,
                headers: Mutex::new(self.headers),
                trailers: Mutex::new(Metadata::new()),
                deadline: self.deadline,
            }),
        }
    }
}

/// One unary invocation: the request message plus its context.
#[derive(Debug, Clone)]
pub struct Call<Req> {
    pub request: Req,
    pub context: CallContext,
}

impl<Req> Call<Req> {
    pub fn new(request: Req, context: CallContext) -> Self {
        Self { request, context }
    }
}
