//! Configuration parsing and structures

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::env::substitute_env_vars;
use crate::session::Credentials;

/// Default transfer chunk size (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Backend used when a remote does not name one
pub const DEFAULT_BACKEND: &str = "filen";

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Values inherited by every remote
    #[serde(default)]
    pub defaults: RemoteDefaults,

    pub remotes: Vec<RawRemoteConfig>,
}

/// Top-level remote defaults section
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RemoteDefaults {
    pub email: Option<String>,

    /// May reference the environment as `${VAR}`
    pub password: Option<String>,

    pub transfer: Option<RawTransferConfig>,
}

/// Transfer tuning; every field is optional so a remote can override a
/// single value and inherit the rest
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawTransferConfig {
    /// Size string such as "512KB" or "1MB"
    pub chunk_size: Option<String>,

    /// Give up on a download that yields nothing for this long
    #[serde(default, with = "humantime_serde")]
    pub chunk_timeout: Option<Duration>,
}

/// Raw remote configuration before resolution
#[derive(Debug, Clone, Deserialize)]
pub struct RawRemoteConfig {
    pub name: String,

    /// Registry key of the backend
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Path prefix inside the account
    #[serde(default)]
    pub root: String,

    pub email: Option<String>,
    pub password: Option<String>,
    pub transfer: Option<RawTransferConfig>,
}

fn default_backend() -> String {
    DEFAULT_BACKEND.to_string()
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Top-level configuration (resolved from RawConfig)
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub remotes: Vec<RemoteConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Remote configuration (resolved)
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub name: String,
    pub backend: String,
    pub root: String,
    pub credentials: Credentials,
    pub transfer: TransferConfig,
}

/// Transfer configuration (resolved)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Read size used when feeding uploads
    pub chunk_size: usize,

    /// None waits indefinitely
    pub chunk_timeout: Option<Duration>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_timeout: None,
        }
    }
}

// =============================================================================
// Resolution Logic
// =============================================================================

impl RawConfig {
    /// Resolve raw config into final config by merging remote overrides with defaults
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let RawConfig {
            logging,
            defaults,
            remotes,
        } = self;

        let remotes = remotes
            .into_iter()
            .map(|raw| Self::resolve_remote(&defaults, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Config { logging, remotes })
    }

    fn resolve_remote(
        defaults: &RemoteDefaults,
        raw: RawRemoteConfig,
    ) -> Result<RemoteConfig, ConfigError> {
        let email = raw
            .email
            .or_else(|| defaults.email.clone())
            .ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "Remote {:?} has no email (either on the remote or in defaults)",
                    raw.name
                ))
            })?;
        let password = raw
            .password
            .or_else(|| defaults.password.clone())
            .ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "Remote {:?} has no password (either on the remote or in defaults)",
                    raw.name
                ))
            })?;

        let credentials = Credentials::new(
            substitute_env_vars(&email)?,
            substitute_env_vars(&password)?,
        );
        let transfer =
            Self::resolve_transfer(defaults.transfer.as_ref(), raw.transfer.as_ref(), &raw.name)?;

        Ok(RemoteConfig {
            name: raw.name,
            backend: raw.backend,
            root: raw.root,
            credentials,
            transfer,
        })
    }

    fn resolve_transfer(
        defaults: Option<&RawTransferConfig>,
        remote: Option<&RawTransferConfig>,
        name: &str,
    ) -> Result<TransferConfig, ConfigError> {
        // Remote values override defaults field by field
        let chunk_size = remote
            .and_then(|t| t.chunk_size.as_deref())
            .or_else(|| defaults.and_then(|t| t.chunk_size.as_deref()));
        let chunk_timeout = remote
            .and_then(|t| t.chunk_timeout)
            .or_else(|| defaults.and_then(|t| t.chunk_timeout));

        let chunk_size = match chunk_size {
            Some(s) => parse_size(s)
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| {
                    ConfigError::ValidationError(format!(
                        "Remote {:?}: invalid chunk_size {:?}",
                        name, s
                    ))
                })?,
            None => DEFAULT_CHUNK_SIZE,
        };

        Ok(TransferConfig {
            chunk_size,
            chunk_timeout,
        })
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        raw.resolve()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remotes.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one remote is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for remote in &self.remotes {
            if remote.name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "Remote name cannot be empty".to_string(),
                ));
            }
            if !names.insert(remote.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate remote name: {:?}",
                    remote.name
                )));
            }
        }

        for remote in &self.remotes {
            if remote.credentials.email.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Remote {:?}: email cannot be empty",
                    remote.name
                )));
            }
            if remote.credentials.password.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Remote {:?}: password cannot be empty",
                    remote.name
                )));
            }
            if remote.transfer.chunk_size == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Remote {:?}: chunk_size must be greater than zero",
                    remote.name
                )));
            }
        }

        Ok(())
    }

    /// Look up a remote by name
    pub fn remote(&self, name: &str) -> Option<&RemoteConfig> {
        self.remotes.iter().find(|r| r.name == name)
    }
}

/// Parse a size string like "1MB", "512KiB" or "4096" into bytes
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().to_uppercase();
    let s = s.replace("IB", "B");
    let (num_part, multiplier) = if let Some(n) = s.strip_suffix("GB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix('B') {
        (n, 1)
    } else {
        (s.as_str(), 1)
    };

    num_part
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
