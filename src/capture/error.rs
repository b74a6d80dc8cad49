//! Error types for capture sessions and summarisation.

use std::io;

use thiserror::Error;

/// Errors surfaced while redirecting a stream or summarising its capture.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CaptureError {
    /// An operation was invoked in a state that does not permit it.
    #[error("{operation} called {reason}")]
    ProtocolViolation {
        /// The session operation that was attempted.
        operation: &'static str,
        /// Why the current state rejects it.
        reason: &'static str,
    },

    /// A chunked read returned fewer bytes than the file length implied.
    #[error(
        "failed to read full {required:#x} byte chunk starting at offset {offset:#x} \
         (got {filled:#x})"
    )]
    ShortRead {
        /// Offset the chunk was read from.
        offset: u64,
        /// Number of bytes known to exist at `offset`.
        required: usize,
        /// Number of bytes actually read.
        filled: usize,
    },

    /// The operating system lacks descriptor duplication primitives.
    #[error("file descriptor duplication is not supported on this platform")]
    UnsupportedPlatform,

    /// Local I/O operation failed.
    #[error("I/O error: {message}")]
    Io {
        /// Error detail from the underlying I/O operation.
        message: String,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {message}")]
    Configuration {
        /// Details about the configuration failure.
        message: String,
    },

    /// The captured command could not be run.
    #[error("command error: {message}")]
    Command {
        /// Details about the command failure.
        message: String,
    },
}

impl CaptureError {
    pub(crate) const fn protocol(operation: &'static str, reason: &'static str) -> Self {
        Self::ProtocolViolation { operation, reason }
    }

    /// Wraps an I/O error with a short description of what was attempted.
    pub(crate) fn io(context: &str, error: &io::Error) -> Self {
        if error.raw_os_error() == Some(libc::ENOSYS) {
            return Self::UnsupportedPlatform;
        }
        Self::Io {
            message: format!("{context}: {error}"),
        }
    }
}

impl From<io::Error> for CaptureError {
    fn from(error: io::Error) -> Self {
        if error.raw_os_error() == Some(libc::ENOSYS) {
            return Self::UnsupportedPlatform;
        }
        Self::Io {
            message: error.to_string(),
        }
    }
}
