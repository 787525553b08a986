//! Error types for instrumented primitives.
//!
//! Recoverable conditions (deadline expiry, cancellation, configuration
//! problems) are reported through [`SyncError`]. Programmer misuse of a
//! primitive, such as unlocking a lock that is not held, is not an error value:
//! it panics, exactly like the primitives being wrapped.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::diagnostics::Operation;

/// Why a deadline-bound operation gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpiryCause {
    /// The deadline or timeout elapsed before the operation could complete.
    DeadlineElapsed,
    /// The caller's [`Context`](crate::Context) was cancelled.
    Cancelled,
}

impl fmt::Display for ExpiryCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpiryCause::DeadlineElapsed => write!(f, "deadline elapsed"),
            ExpiryCause::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Errors returned by instrumented primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The operation did not complete before its deadline or cancellation.
    ///
    /// Timeouts and cancellations share this variant; inspect `cause` to tell
    /// them apart.
    #[error("{operation} expired after {waited:?}: {cause}")]
    Expired {
        /// The operation that expired.
        operation: Operation,
        /// What ended the wait.
        cause: ExpiryCause,
        /// How long the caller waited before giving up.
        waited: Duration,
    },

    /// The opposite end of the channel no longer exists.
    #[error("{operation} failed: channel disconnected")]
    Disconnected {
        /// The operation that observed the disconnect.
        operation: Operation,
    },
}

impl SyncError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }

    /// Create an expiry error.
    #[must_use]
    pub fn expired(operation: Operation, cause: ExpiryCause, waited: Duration) -> Self {
        Self::Expired {
            operation,
            cause,
            waited,
        }
    }

    /// Create a disconnected error.
    #[must_use]
    pub fn disconnected(operation: Operation) -> Self {
        Self::Disconnected { operation }
    }

    /// True for both timeouts and cancellations.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired { .. })
    }

    /// True if the operation expired because its deadline elapsed.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Expired {
                cause: ExpiryCause::DeadlineElapsed,
                ..
            }
        )
    }

    /// True if the operation expired because its context was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Expired {
                cause: ExpiryCause::Cancelled,
                ..
            }
        )
    }

    /// The expiry cause, if this is an expiry.
    #[must_use]
    pub fn cause(&self) -> Option<ExpiryCause> {
        match self {
            Self::Expired { cause, .. } => Some(*cause),
            _ => None,
        }
    }
}

/// A failed send. Carries the element that was not enqueued so the caller can
/// decide whether to retry.
#[derive(Clone, PartialEq, Eq)]
pub struct SendError<T> {
    value: T,
    error: SyncError,
}

impl<T> SendError<T> {
    pub(crate) fn new(value: T, error: SyncError) -> Self {
        Self { value, error }
    }

    /// The underlying failure.
    #[must_use]
    pub fn error(&self) -> &SyncError {
        &self.error
    }

    /// Recover the element that was not sent.
    pub fn into_inner(self) -> T {
        self.value
    }

    /// Split into the element and the failure.
    pub fn into_parts(self) -> (T, SyncError) {
        (self.value, self.error)
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl<T> std::error::Error for SendError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl<T> From<SendError<T>> for SyncError {
    fn from(err: SendError<T>) -> Self {
        err.error
    }
}

/// A specialized `Result` type for instrumented primitives.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Abort the caller for a broken primitive invariant.
#[cold]
#[track_caller]
#[expect(
    clippy::panic,
    reason = "misusing a lock or wait group is a caller bug, as in the wrapped primitives"
)]
pub(crate) fn misuse(message: &str) -> ! {
    panic!("debugsync: {message}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::expired(
            Operation::ChannelSend,
            ExpiryCause::DeadlineElapsed,
            Duration::from_millis(5),
        );
        let text = err.to_string();
        assert!(text.contains("channel send"));
        assert!(text.contains("deadline elapsed"));

        let err = SyncError::invalid_configuration("capacity too large");
        assert!(err.to_string().contains("capacity too large"));
    }

    #[test]
    fn test_timeout_and_cancel_share_kind() {
        let timeout = SyncError::expired(
            Operation::ChannelRecv,
            ExpiryCause::DeadlineElapsed,
            Duration::ZERO,
        );
        let cancelled =
            SyncError::expired(Operation::ChannelRecv, ExpiryCause::Cancelled, Duration::ZERO);

        assert!(timeout.is_expired() && cancelled.is_expired());
        assert!(timeout.is_timeout() && !timeout.is_cancelled());
        assert!(cancelled.is_cancelled() && !cancelled.is_timeout());
        assert_eq!(cancelled.cause(), Some(ExpiryCause::Cancelled));
        assert_eq!(SyncError::disconnected(Operation::ChannelSend).cause(), None);
    }

    #[test]
    fn test_send_error_returns_value() {
        let err = SendError::new(
            7_u32,
            SyncError::expired(Operation::ChannelSend, ExpiryCause::Cancelled, Duration::ZERO),
        );
        assert!(err.error().is_cancelled());
        assert!(format!("{err:?}").contains("SendError"));
        assert_eq!(err.into_inner(), 7);
    }

    #[test]
    #[should_panic(expected = "debugsync: unlock of unlocked mutex")]
    fn test_misuse_panics() {
        misuse("unlock of unlocked mutex");
    }
}
