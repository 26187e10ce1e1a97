//! Tracing subscriber setup

use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, LoggingConfig};

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over the configured level. Calling this more
/// than once is harmless; later calls keep the first subscriber.
pub fn init(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            ConfigError::ValidationError(format!("Invalid log level {:?}: {}", config.level, e))
        })?,
    };

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_err()
    {
        debug!("tracing subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        let config = LoggingConfig {
            level: "debug".to_string(),
        };
        init(&config).unwrap();
        init(&config).unwrap();
    }

    #[test]
    fn test_invalid_level() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: "filen_adapter=loud".to_string(),
        };
        assert!(init(&config).is_err());
    }
}
