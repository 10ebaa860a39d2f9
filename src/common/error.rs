//! Error types for the installation harness
//!
//! The variants follow how far a failure reaches: environment failures end
//! the suite run, dispatch and assertion failures end one test case, and
//! cleanup failures are only ever reported as warnings.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Target Lifecycle Errors ===
    #[error("Execution target unavailable: {0}")]
    EnvironmentUnavailable(String),

    #[error("Execution target is not running. It was never started or has already been cleaned up")]
    TargetClosed,

    #[error("Cleanup did not complete: {0}")]
    CleanupFailure(String),

    // === Dispatch Errors ===
    #[error("Failed to dispatch '{command}': {reason}")]
    DispatchFailure { command: String, reason: String },

    #[error("Command '{command}' timed out after {secs} seconds")]
    Timeout { command: String, secs: u64 },

    // === Test Outcome Errors ===
    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Skipped: {0}")]
    Skipped(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a dispatch failure for a command
    pub fn dispatch(command: &str, reason: impl Into<String>) -> Self {
        Self::DispatchFailure {
            command: command.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an assertion failure
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    /// Whether the command never produced an exit code
    pub fn is_dispatch_failure(&self) -> bool {
        matches!(
            self,
            Error::DispatchFailure { .. } | Error::Timeout { .. } | Error::TargetClosed
        )
    }

    /// Whether this error must end the whole suite run
    pub fn is_fatal_to_suite(&self) -> bool {
        matches!(self, Error::EnvironmentUnavailable(_))
    }
}
