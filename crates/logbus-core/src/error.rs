//! Error types for Logbus

use thiserror::Error;

/// Main error type for Logbus operations
#[derive(Error, Debug)]
pub enum LogError {
    /// Bad or missing configuration, unknown writer/formatter, reserved level name
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A writer or formatter was registered twice under the same name
    #[error("{kind} already defined: {name}")]
    AlreadyDefined {
        /// "Writer" or "Formatter"
        kind: &'static str,
        /// Normalized (lowercase) plugin name
        name: String,
    },

    /// Operation is not legal in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Level could not be resolved against the configured level set
    #[error("Invalid level: {0}")]
    InvalidLevel(String),

    /// No usable message could be built for a log call
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// A relayed child message was malformed
    #[error("Relay error: {0}")]
    Relay(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LogError {
    /// True for errors a caller should treat as configuration failures.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            LogError::Configuration(_) | LogError::AlreadyDefined { .. }
        )
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        LogError::Configuration(msg.into())
    }
}

/// Result type alias using LogError
pub type LogResult<T> = Result<T, LogError>;
