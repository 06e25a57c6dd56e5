//! Client configuration
//!
//! Loaded from an optional TOML file and `OBD_*` environment variables,
//! e.g. `OBD_SERIAL__PORT=/dev/rfcomm0` or `OBD_SESSION__COMMAND_TIMEOUT_MS=3000`.

use crate::error::ObdError;
use crate::protocol::ObdProtocol;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Full client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub serial: SerialConfig,
    pub session: SessionConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

/// Serial device settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path (e.g., "/dev/ttyUSB0" or "COM3")
    pub port: String,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            // ELM327 clones ship at 38400; genuine v1.x parts at 9600
            baud_rate: 38400,
        }
    }
}

/// Adapter session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// AT commands sent before protocol selection
    pub init_commands: Vec<String>,
    /// Protocol selected after the init commands
    pub protocol: ObdProtocol,
    /// Request that must answer before the session is ready
    pub probe_command: String,
    /// Per-exchange timeout once ready
    pub command_timeout_ms: u64,
    /// Timeout for reset, protocol search and probe
    pub init_timeout_ms: u64,
    /// How long to wait for a late reply after a timeout
    pub drain_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            init_commands: vec!["ATZ".to_string(), "ATE0".to_string()],
            protocol: ObdProtocol::Auto,
            probe_command: "0100".to_string(),
            command_timeout_ms: 2000,
            init_timeout_ms: 5000,
            drain_timeout_ms: 100,
        }
    }
}

impl SessionConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Retry policy applied by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per command when the adapter times out
    pub max_attempts: u8,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

/// Tracing output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Maximum level: trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl ClientConfig {
    /// Load from an optional TOML file, then apply `OBD_*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ObdError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("OBD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: ClientConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text; missing keys keep their defaults
    pub fn from_toml(text: &str) -> Result<Self, ObdError> {
        let config: ClientConfig = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every exchange fail
    pub fn validate(&self) -> Result<(), ObdError> {
        if self.serial.port.trim().is_empty() {
            return Err(ObdError::Config("serial.port must not be empty".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ObdError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.session.command_timeout_ms == 0 || self.session.init_timeout_ms == 0 {
            return Err(ObdError::Config("session timeouts must be positive".to_string()));
        }
        if self.session.probe_command.trim().is_empty() {
            return Err(ObdError::Config("session.probe_command must not be empty".to_string()));
        }
        Ok(())
    }
}
