//! Tracing subscriber setup

use crate::config::LoggingConfig;
use crate::error::ObdError;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install the global tracing subscriber described by `config`.
///
/// Fails instead of panicking when a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ObdError> {
    let level = Level::from_str(&config.level)
        .map_err(|e| ObdError::Logging(format!("invalid level {:?}: {e}", config.level)))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    let installed = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.map_err(|e| ObdError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_rejected() {
        let config = LoggingConfig {
            level: "chatty".to_string(),
            json: false,
        };
        assert!(matches!(init_logging(&config), Err(ObdError::Logging(_))));
    }
}
