//! Failure outcomes for unary calls.
//!
//! Every interceptor and handler returns `Result<Resp, CallError>`. A [`CallError`] is either a
//! status-coded [`Status`] (the RPC-visible outcome) or a [`Fault`], an uncoded failure such as
//! a programming error or a caught panic. Faults are never retried and are only translated by
//! the recovery interceptor.
use std::any::Any;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Shared, type-erased underlying error attached to a failure.
pub type Cause = Arc<dyn Error + Send + Sync + 'static>;

/// gRPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Code {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl Code {
    /// Canonical upper-snake name, as used on the wire by gRPC tooling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::Cancelled => "CANCELLED",
            Code::Unknown => "UNKNOWN",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::OutOfRange => "OUT_OF_RANGE",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Internal => "INTERNAL",
            Code::Unavailable => "UNAVAILABLE",
            Code::DataLoss => "DATA_LOSS",
            Code::Unauthenticated => "UNAUTHENTICATED",
        }
    }

    /// Severity a server should log a call finishing with this code at.
    ///
    /// Follows the usual server-side mapping: caller mistakes are informational, transient and
    /// precondition failures are warnings, and server bugs are errors.
    pub fn server_log_level(&self) -> tracing::Level {
        match self {
            Code::Ok
            | Code::Cancelled
            | Code::InvalidArgument
            | Code::NotFound
            | Code::AlreadyExists
            | Code::Unauthenticated => tracing::Level::INFO,
            Code::DeadlineExceeded
            | Code::PermissionDenied
            | Code::ResourceExhausted
            | Code::FailedPrecondition
            | Code::Aborted
            | Code::OutOfRange
            | Code::Unavailable => tracing::Level::WARN,
            Code::Unknown | Code::Unimplemented | Code::Internal | Code::DataLoss => {
                tracing::Level::ERROR
            }
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status-coded failure: the outcome an RPC caller can observe.
#[derive(Clone)]
pub struct Status {
    code: Code,
    message: String,
    cause: Option<Cause>,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), cause: None }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(Code::Aborted, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Code::Unknown, message)
    }

    /// Attach the underlying error that produced this status.
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Status")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("cause", &self.cause.as_ref().map(|c| c.to_string()))
            .finish()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Error for Status {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as &(dyn Error + 'static))
    }
}

/// An uncoded failure: a programming error, an unhandled dependency error, or a panic.
#[derive(Clone)]
pub struct Fault {
    message: String,
    cause: Option<Cause>,
    panicked: bool,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), cause: None, panicked: false }
    }

    /// Wrap an arbitrary error as a fault, keeping it as the cause.
    pub fn from_error<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self { message: error.to_string(), cause: Some(Arc::new(error)), panicked: false }
    }

    /// Build a fault from a panic payload caught with `catch_unwind`.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message: format!("handler panicked: {}", detail), cause: None, panicked: true }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    /// True when this fault was produced by a caught panic.
    pub fn panicked(&self) -> bool {
        self.panicked
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("message", &self.message)
            .field("cause", &self.cause.as_ref().map(|c| c.to_string()))
            .field("panicked", &self.panicked)
            .finish()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for Fault {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as &(dyn Error + 'static))
    }
}

/// Failure outcome of a unary call.
#[derive(Debug, Clone)]
pub enum CallError {
    /// A status-coded failure.
    Status(Status),
    /// A failure without a status code. Only the recovery interceptor translates these.
    Fault(Fault),
}

impl CallError {
    pub fn status(code: Code, message: impl Into<String>) -> Self {
        CallError::Status(Status::new(code, message))
    }

    pub fn fault(message: impl Into<String>) -> Self {
        CallError::Fault(Fault::new(message))
    }

    /// Status code of the failure; faults report `Unknown`.
    pub fn code(&self) -> Code {
        match self {
            CallError::Status(s) => s.code(),
            CallError::Fault(_) => Code::Unknown,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CallError::Status(s) => s.message(),
            CallError::Fault(f) => f.message(),
        }
    }

    pub fn cause(&self) -> Option<&Cause> {
        match self {
            CallError::Status(s) => s.cause(),
            CallError::Fault(f) => f.cause(),
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, CallError::Fault(_))
    }

    pub fn as_status(&self) -> Option<&Status> {
        match self {
            CallError::Status(s) => Some(s),
            CallError::Fault(_) => None,
        }
    }

    pub fn as_fault(&self) -> Option<&Fault> {
        match self {
            CallError::Fault(f) => Some(f),
            CallError::Status(_) => None,
        }
    }

    /// Severity this failure is logged at by a server: never lower than `WARN`.
    pub fn log_level(&self) -> tracing::Level {
        match self {
            CallError::Fault(_) => tracing::Level::ERROR,
            CallError::Status(s) => match s.code().server_log_level() {
                tracing::Level::ERROR => tracing::Level::ERROR,
                _ => tracing::Level::WARN,
            },
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Status(s) => write!(f, "{}", s),
            CallError::Fault(fault) => write!(f, "fault: {}", fault),
        }
    }
}

impl Error for CallError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CallError::Status(s) => s.source(),
            CallError::Fault(f) => f.source(),
        }
    }
}

impl From<Status> for CallError {
    fn from(status: Status) -> Self {
        CallError::Status(status)
    }
}

impl From<Fault> for CallError {
    fn from(fault: Fault) -> Self {
        CallError::Fault(fault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn status_display_includes_code_and_message() {
        let err = CallError::from(Status::unavailable("backend down"));
        assert_eq!(err.to_string(), "UNAVAILABLE: backend down");
        assert_eq!(err.code(), Code::Unavailable);
        assert!(!err.is_fault());
    }

    #[test]
    fn fault_reports_unknown_code() {
        let err = CallError::fault("nil map");
        assert_eq!(err.code(), Code::Unknown);
        assert!(err.is_fault());
        assert_eq!(err.to_string(), "fault: nil map");
    }

    #[test]
    fn cause_is_exposed_as_source() {
        let io_err = io::Error::new(io::ErrorKind::Other, "disk on fire");
        let err = CallError::from(Status::internal("write failed").with_cause(io_err));
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "disk on fire");
        assert_eq!(err.cause().map(|c| c.to_string()).as_deref(), Some("disk on fire"));
    }

    #[test]
    fn fault_from_error_keeps_message_and_cause() {
        let fault = Fault::from_error(io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(fault.message(), "boom");
        assert!(fault.cause().is_some());
        assert!(!fault.panicked());
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let from_str = Fault::from_panic(Box::new("static str"));
        assert!(from_str.panicked());
        assert!(from_str.message().contains("static str"));

        let from_string = Fault::from_panic(Box::new(String::from("owned")));
        assert!(from_string.message().contains("owned"));

        let opaque = Fault::from_panic(Box::new(42u32));
        assert!(opaque.message().contains("non-string"));
    }

    #[test]
    fn failure_log_level_is_at_least_warn() {
        assert_eq!(CallError::status(Code::NotFound, "x").log_level(), tracing::Level::WARN);
        assert_eq!(CallError::status(Code::Unavailable, "x").log_level(), tracing::Level::WARN);
        assert_eq!(CallError::status(Code::Internal, "x").log_level(), tracing::Level::ERROR);
        assert_eq!(CallError::fault("x").log_level(), tracing::Level::ERROR);
    }

    #[test]
    fn code_names_match_grpc() {
        assert_eq!(Code::DeadlineExceeded.to_string(), "DEADLINE_EXCEEDED");
        assert_eq!(Code::Ok.as_str(), "OK");
        assert_eq!(Code::InvalidArgument.server_log_level(), tracing::Level::INFO);
    }
}
