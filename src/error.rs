// Error types shared across the acquisition and processing core
//
// One status taxonomy is used everywhere: queues, message channels, worker
// threads, the DSP pipelines, the digitizer controller and the vendor-library
// boundary all report the same set of failure kinds. Vendor errors are
// surfaced verbatim through the `External` variant.

use std::fmt;

/// Numeric status codes matching the shared taxonomy.
///
/// These values appear in log output and in the acknowledgement messages the
/// digitizer controller echoes back to the UI, so they are stable.
pub struct StatusCodes {}

impl StatusCodes {
    /// A persistent queue returned the final copy of its tail element.
    pub const LAST: i32 = 1;
    /// Success.
    pub const OK: i32 = 0;
    /// Invalid argument.
    pub const INVALID: i32 = -1;
    /// Resource temporarily unavailable (would block / no data).
    pub const AGAIN: i32 = -2;
    /// Data overrun.
    pub const OVERFLOW: i32 = -3;
    /// Resource not ready (lifecycle violation).
    pub const NOT_READY: i32 = -4;
    /// Operation interrupted by shutdown.
    pub const INTERRUPTED: i32 = -5;
    /// I/O error.
    pub const IO: i32 = -6;
    /// External error, e.g. from the vendor library or the OS.
    pub const EXTERNAL: i32 = -7;
    /// Operation not supported by the device.
    pub const UNSUPPORTED: i32 = -8;
    /// Internal error, cannot be addressed by the user.
    pub const INTERNAL: i32 = -9;
}

/// Errors reported by the core.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Invalid argument.
    Invalid { details: String },

    /// The operation would block or there is no data available.
    Again,

    /// Data overrun.
    Overflow,

    /// The resource is in the wrong lifecycle state for the operation.
    NotReady,

    /// A blocking operation was interrupted by shutdown.
    Interrupted,

    /// I/O error.
    Io { details: String },

    /// The vendor library failed; the code is passed through verbatim.
    External { code: i32 },

    /// The operation is not supported by the device.
    Unsupported { details: String },

    /// An internal invariant was broken.
    Internal { details: String },
}

impl CoreError {
    /// Shorthand for an `Invalid` error with a rendered message.
    pub fn invalid(details: impl Into<String>) -> Self {
        CoreError::Invalid {
            details: details.into(),
        }
    }

    /// Shorthand for an `Internal` error with a rendered message.
    pub fn internal(details: impl Into<String>) -> Self {
        CoreError::Internal {
            details: details.into(),
        }
    }

    /// Shorthand for an `Unsupported` error with a rendered message.
    pub fn unsupported(details: impl Into<String>) -> Self {
        CoreError::Unsupported {
            details: details.into(),
        }
    }

    /// Get the numeric status code.
    pub fn code(&self) -> i32 {
        match self {
            CoreError::Invalid { .. } => StatusCodes::INVALID,
            CoreError::Again => StatusCodes::AGAIN,
            CoreError::Overflow => StatusCodes::OVERFLOW,
            CoreError::NotReady => StatusCodes::NOT_READY,
            CoreError::Interrupted => StatusCodes::INTERRUPTED,
            CoreError::Io { .. } => StatusCodes::IO,
            CoreError::External { .. } => StatusCodes::EXTERNAL,
            CoreError::Unsupported { .. } => StatusCodes::UNSUPPORTED,
            CoreError::Internal { .. } => StatusCodes::INTERNAL,
        }
    }

    /// Get the human-readable error message.
    pub fn message(&self) -> String {
        match self {
            CoreError::Invalid { details } => format!("Invalid argument: {}", details),
            CoreError::Again => "Resource temporarily unavailable.".to_string(),
            CoreError::Overflow => "Data overflow.".to_string(),
            CoreError::NotReady => "Resource not ready.".to_string(),
            CoreError::Interrupted => "Operation interrupted.".to_string(),
            CoreError::Io { details } => format!("I/O error: {}", details),
            CoreError::External { code } => format!("External error, code {}.", code),
            CoreError::Unsupported { details } => format!("Unsupported operation: {}", details),
            CoreError::Internal { details } => format!("Internal error: {}", details),
        }
    }

    /// True for the status codes a blocking wait emits when there is simply
    /// nothing to do yet: timeout, not started, or shutting down.
    pub fn is_benign_wait(&self) -> bool {
        matches!(
            self,
            CoreError::Again | CoreError::NotReady | CoreError::Interrupted
        )
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message(), self.code())
    }
}

impl std::error::Error for CoreError {}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io {
            details: err.to_string(),
        }
    }
}

/// Result alias used throughout the crate.
pub type CoreResult<T> = Result<T, CoreError>;

/// Outcome of a successful queue read.
///
/// A queue in persistent mode replays its tail element until a successor
/// arrives; repeat deliveries are tagged `Last` so the reader can tell state
/// from fresh data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Ok,
    Last,
}

impl ReadStatus {
    pub fn code(&self) -> i32 {
        match self {
            ReadStatus::Ok => StatusCodes::OK,
            ReadStatus::Last => StatusCodes::LAST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(CoreError::invalid("x").code(), StatusCodes::INVALID);
        assert_eq!(CoreError::Again.code(), StatusCodes::AGAIN);
        assert_eq!(CoreError::Overflow.code(), StatusCodes::OVERFLOW);
        assert_eq!(CoreError::NotReady.code(), StatusCodes::NOT_READY);
        assert_eq!(CoreError::Interrupted.code(), StatusCodes::INTERRUPTED);
        assert_eq!(
            CoreError::Io {
                details: "x".to_string()
            }
            .code(),
            StatusCodes::IO
        );
        assert_eq!(
            CoreError::External { code: -17 }.code(),
            StatusCodes::EXTERNAL
        );
        assert_eq!(CoreError::unsupported("x").code(), StatusCodes::UNSUPPORTED);
        assert_eq!(CoreError::internal("x").code(), StatusCodes::INTERNAL);
    }

    #[test]
    fn test_external_code_passthrough() {
        let err = CoreError::External { code: -1234 };
        assert!(err.message().contains("-1234"));
    }

    #[test]
    fn test_benign_wait_classification() {
        assert!(CoreError::Again.is_benign_wait());
        assert!(CoreError::NotReady.is_benign_wait());
        assert!(CoreError::Interrupted.is_benign_wait());
        assert!(!CoreError::internal("x").is_benign_wait());
        assert!(!CoreError::External { code: -1 }.is_benign_wait());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::other("disk on fire");
        let err: CoreError = io_err.into();
        match err {
            CoreError::Io { details } => assert!(details.contains("disk on fire")),
            _ => panic!("Expected Io"),
        }
    }

    #[test]
    fn test_read_status_codes() {
        assert_eq!(ReadStatus::Ok.code(), StatusCodes::OK);
        assert_eq!(ReadStatus::Last.code(), StatusCodes::LAST);
    }
}
