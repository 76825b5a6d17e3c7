//! Caller-side deadlines and cancellation.
//!
//! Any COSI operation future can be driven through [`invoke`] or
//! [`invoke_cancellable`].  When the deadline elapses or the cancel signal
//! fires, the operation future is dropped and the caller gets
//! [`CosiError::DeadlineExceeded`] or [`CosiError::Cancelled`].  Both mean
//! "outcome unknown": the bundled drivers roll back anything not yet
//! committed when their future is dropped, so reissuing the identical
//! request reaches a deterministic result.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::config::DriverConfig;
use crate::error::CosiError;

/// Per-call options applied by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Upper bound on the call's duration.  `None` means no deadline.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// The configured request timeout as a per-call deadline.  A zero timeout
/// disables the deadline.
impl From<&DriverConfig> for CallOptions {
    fn from(config: &DriverConfig) -> Self {
        Self {
            timeout: Some(config.request_timeout).filter(|t| !t.is_zero()),
        }
    }
}

/// Run `fut` under the deadline in `opts`.
pub async fn invoke<T, F>(opts: &CallOptions, op: &str, fut: F) -> Result<T, CosiError>
where
    F: Future<Output = Result<T, CosiError>>,
{
    match opts.timeout {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(res) => res,
            Err(_) => {
                debug!(op, ?limit, "call deadline exceeded");
                Err(CosiError::DeadlineExceeded(format!(
                    "{op} did not complete within {limit:?}"
                )))
            }
        },
        None => fut.await,
    }
}

/// Run `fut` under the deadline in `opts`, abandoning it as soon as `cancel`
/// resolves.
pub async fn invoke_cancellable<T, F, C>(
    opts: &CallOptions,
    op: &str,
    fut: F,
    cancel: C,
) -> Result<T, CosiError>
where
    F: Future<Output = Result<T, CosiError>>,
    C: Future<Output = ()>,
{
    tokio::select! {
        biased;
        () = cancel => {
            debug!(op, "call cancelled by caller");
            Err(CosiError::Cancelled(format!("{op} cancelled by caller")))
        }
        res = invoke(opts, op, fut) => res,
    }
}
