//! COSI error types.
//!
//! All errors in the `libcosi` crate are represented by the [`CosiError`]
//! enum, which derives [`thiserror::Error`] for ergonomic error handling and
//! also implements [`Serialize`]/[`Deserialize`] so errors travel verbatim
//! across the QUIC transport layer.
//!
//! Every variant maps onto a gRPC-compatible status [`Code`].  Drivers map
//! backend faults onto this taxonomy and never retry on their own; retry
//! policy belongs to the caller, guided by [`CosiError::is_retryable`].

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for COSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum CosiError {
    /// Malformed request; not retryable without fixing the input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The referenced bucket or grant does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A conflicting bucket or grant already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Backend state forbids the operation, e.g. deleting a non-empty bucket.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Quota or capacity exhausted.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Transient backend failure; safe to retry with backoff.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Operation or test behavior is not configured.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// Unexpected backend fault.
    #[error("internal error: {0}")]
    Internal(String),

    /// The caller cancelled the call; its outcome is unknown.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The caller's deadline elapsed; the call's outcome is unknown.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// A QUIC / transport-level error; the call's outcome is unknown.
    #[error("transport error: {0}")]
    Transport(String),
}

/// gRPC-compatible status codes carried by [`CosiError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    Cancelled = 1,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
}

impl Code {
    /// Human-readable description of this code.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Code::Cancelled => "The operation was cancelled",
            Code::InvalidArgument => "Client specified an invalid argument",
            Code::DeadlineExceeded => "Deadline expired before operation could complete",
            Code::NotFound => "Some requested entity was not found",
            Code::AlreadyExists => "Some entity that we attempted to create already exists",
            Code::ResourceExhausted => "Some resource has been exhausted",
            Code::FailedPrecondition => {
                "The system is not in a state required for the operation's execution"
            }
            Code::Unimplemented => "Operation is not implemented or not configured",
            Code::Internal => "Internal error",
            Code::Unavailable => "The service is currently unavailable",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl From<Code> for i32 {
    fn from(code: Code) -> i32 {
        code as i32
    }
}

impl CosiError {
    /// Status code of this error.
    #[must_use]
    pub const fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::NotFound(_) => Code::NotFound,
            Self::AlreadyExists(_) => Code::AlreadyExists,
            Self::FailedPrecondition(_) => Code::FailedPrecondition,
            Self::ResourceExhausted(_) => Code::ResourceExhausted,
            Self::Unavailable(_) | Self::Transport(_) => Code::Unavailable,
            Self::Unimplemented(_) => Code::Unimplemented,
            Self::Internal(_) => Code::Internal,
            Self::Cancelled(_) => Code::Cancelled,
            Self::DeadlineExceeded(_) => Code::DeadlineExceeded,
        }
    }

    /// Whether the caller may reissue the identical request.
    ///
    /// True for transient failures and for calls whose outcome is unknown
    /// (cancelled, timed out, lost in transport).  Every other kind is
    /// terminal for the request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Cancelled(_) | Self::DeadlineExceeded(_) | Self::Transport(_)
        )
    }

    /// Create a [`CosiError::Unavailable`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn unavailable<E: fmt::Display>(e: E) -> Self {
        Self::Unavailable(e.to_string())
    }

    /// Create a [`CosiError::Transport`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    /// Create a [`CosiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<io::Error> for CosiError {
    fn from(e: io::Error) -> Self {
        let msg = e.to_string();
        match e.kind() {
            io::ErrorKind::NotFound => Self::NotFound(msg),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(msg),
            io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded => {
                Self::ResourceExhausted(msg)
            }
            io::ErrorKind::Interrupted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ResourceBusy => Self::Unavailable(msg),
            _ => Self::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CosiError::NotFound("bucket b-logs-01".into());
        assert_eq!(err.to_string(), "not found: bucket b-logs-01");
    }

    #[test]
    fn codes_match_grpc_numbering() {
        assert_eq!(i32::from(CosiError::InvalidArgument(String::new()).code()), 3);
        assert_eq!(i32::from(CosiError::AlreadyExists(String::new()).code()), 6);
        assert_eq!(i32::from(CosiError::FailedPrecondition(String::new()).code()), 9);
        assert_eq!(i32::from(CosiError::Unimplemented(String::new()).code()), 12);
        assert_eq!(i32::from(CosiError::Transport(String::new()).code()), 14);
    }

    #[test]
    fn retryable_kinds() {
        assert!(CosiError::Unavailable("busy".into()).is_retryable());
        assert!(CosiError::DeadlineExceeded("1s".into()).is_retryable());
        assert!(CosiError::Cancelled("caller".into()).is_retryable());
        assert!(!CosiError::AlreadyExists("b".into()).is_retryable());
        assert!(!CosiError::Internal("boom".into()).is_retryable());
    }

    #[test]
    fn io_error_mapping() {
        let e: CosiError = io::Error::new(io::ErrorKind::StorageFull, "disk full").into();
        assert!(matches!(e, CosiError::ResourceExhausted(_)));
        let e: CosiError = io::Error::new(io::ErrorKind::PermissionDenied, "nope").into();
        assert!(matches!(e, CosiError::Internal(_)));
    }

    #[test]
    fn error_serde_roundtrip() {
        let err = CosiError::FailedPrecondition("bucket b-logs-01 is not empty".into());
        let json = serde_json::to_string(&err).expect("serialize");
        let de: CosiError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(err, de);
    }
}
