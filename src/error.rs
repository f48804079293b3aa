//! Custom error types for the synchronization layer.
//!
//! This module defines the primary error type, `SyncError`, shared by the correction
//! lifecycle manager, the serial command mirror and the configuration layer. Using the
//! `thiserror` crate, it keeps the small set of failure modes explicit so callers can
//! tell a refused transition apart from a failing hardware accessor.
//!
//! ## Error Hierarchy
//!
//! - **`AcquisitionInProgress`**: a correction-stage transition was requested while the
//!   acquisition status reports "running". Never queued; the caller retries once the
//!   acquisition has finished.
//! - **`ValueParse`**: the value field of a monitored serial command is not an integer.
//!   Produced only for diagnostics; the serial mirror logs it and carries on.
//! - **`InvalidCommand`**: a command string does not follow the serial line grammar.
//! - **`Hardware`**: any getter or setter on a hardware-control facet failed. The source
//!   error is kept unchanged, no retry is attempted here.
//! - **`Config`** / **`Configuration`**: configuration loading and validation.
//!
//! By using `#[from]`, `SyncError` can be created from facet errors with the `?` operator.

use std::num::ParseIntError;
use thiserror::Error;

/// Convenience alias for results using the synchronization error type.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Failures of the synchronization layer.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A correction stage cannot be installed or removed during an acquisition.
    #[error("Acquisition is running")]
    AcquisitionInProgress,

    /// Value field of a serial command is not a valid integer.
    #[error("Invalid integer value '{value}' in '{token}' command: {source}")]
    ValueParse {
        /// Command token
        token: String,
        /// Offending value text
        value: String,
        /// Integer parse failure
        #[source]
        source: ParseIntError,
    },

    /// Message rejected by the serial line grammar.
    #[error("Invalid Frelon message: {0:?}")]
    InvalidCommand(String),

    /// A hardware-control facet accessor failed.
    #[error("Hardware access error: {0}")]
    Hardware(#[from] anyhow::Error),

    /// Figment could not load or extract the configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Loaded configuration failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The tracing subscriber could not be installed.
    #[error("Failed to initialize tracing: {0}")]
    Tracing(String),
}

impl SyncError {
    /// Whether the caller may retry the same operation later without changing anything.
    ///
    /// Only a refused transition qualifies: the acquisition will eventually stop.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::AcquisitionInProgress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_error_keeps_source_message() {
        let err: SyncError = anyhow::anyhow!("serial timeout").into();
        assert!(matches!(err, SyncError::Hardware(_)));
        assert_eq!(err.to_string(), "Hardware access error: serial timeout");
    }

    #[test]
    fn test_value_parse_display() {
        let source = "5.5".parse::<i64>().unwrap_err();
        let err = SyncError::ValueParse {
            token: "T".into(),
            value: "5.5".into(),
            source,
        };
        assert!(err.to_string().starts_with("Invalid integer value '5.5' in 'T' command"));
    }

    #[test]
    fn test_only_acquisition_in_progress_is_retryable() {
        assert!(SyncError::AcquisitionInProgress.is_retryable());
        assert!(!SyncError::InvalidCommand("?".into()).is_retryable());
        assert!(!SyncError::Configuration("bad".into()).is_retryable());
    }
}
