//! OBD-II Error Types

use thiserror::Error;

/// Errors that can occur during OBD-II communication
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ObdError {
    /// Link-level failure (port unavailable, write failed, stream closed)
    #[error("Transport error: {0}")]
    Transport(String),

    /// No prompt received within the exchange timeout
    #[error("Timeout waiting for OBD response after {0}ms")]
    Timeout(u64),

    /// Adapter text that is not a valid hex frame or status line
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Payload does not fit the PID's formula
    #[error("Cannot decode {pid}: {reason}")]
    Decode { pid: &'static str, reason: String },

    /// Reset, echo-off, protocol selection or probe failed
    #[error("Adapter initialization failed: {0}")]
    AdapterInit(String),

    /// Command issued while the session is not ready for it
    #[error("Command {command:?} not allowed in state {state}")]
    InvalidState { command: String, state: String },

    /// Adapter answered with an error status (`?`, `CAN ERROR`, ...)
    #[error("Adapter reported: {0}")]
    Adapter(String),

    /// Vehicle did not acknowledge a mode 04 request
    #[error("Clearing trouble codes failed: {0}")]
    ClearRejected(String),

    /// Client configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// Global tracing subscriber could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl ObdError {
    /// Whether the caller may retry the same command
    pub fn is_timeout(&self) -> bool {
        matches!(self, ObdError::Timeout(_))
    }
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::Transport(err.to_string())
    }
}

impl From<tokio_serial::Error> for ObdError {
    fn from(err: tokio_serial::Error) -> Self {
        ObdError::Transport(err.to_string())
    }
}

impl From<config::ConfigError> for ObdError {
    fn from(err: config::ConfigError) -> Self {
        ObdError::Config(err.to_string())
    }
}
