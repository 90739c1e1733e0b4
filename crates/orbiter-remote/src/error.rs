//! Error types for remote operations

use std::time::Duration;

use thiserror::Error;

/// Result type for remote operations
pub type Result<T> = std::result::Result<T, RemoteError>;

/// Remote shell errors
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The path or resource does not exist on the target
    #[error("Not found on target: {path}")]
    NotFound { path: String },

    /// A deadline elapsed before the operation completed
    #[error("Timed out after {:.1}s waiting for {target}", .elapsed.as_secs_f64())]
    Timeout { target: String, elapsed: Duration },

    /// The transport invocation could not run or reported failure
    #[error("Transport failure running `{command}`: {reason}")]
    Transport { command: String, reason: String },
}

impl RemoteError {
    /// Whether this error means the target path is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
