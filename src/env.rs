//! Environment variable substitution for configuration values
//!
//! Credential values may reference the environment as `${VAR_NAME}` so that
//! secrets stay out of configuration files.

use std::env;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::ConfigError;

/// Matches `${VAR_NAME}`
static ENV_VAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("environment variable pattern is valid")
});

/// Replace every `${VAR_NAME}` in `input` with the variable's value.
///
/// All unset variables are reported in a single error.
///
/// ```ignore
/// std::env::set_var("FILEN_PASSWORD", "secret");
/// assert_eq!(substitute_env_vars("${FILEN_PASSWORD}").unwrap(), "secret");
/// ```
pub fn substitute_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut missing: Vec<String> = Vec::new();

    let output = ENV_VAR_PATTERN.replace_all(input, |caps: &Captures| {
        let name = &caps[1];
        env::var(name).unwrap_or_else(|_| {
            if !missing.iter().any(|m| m == name) {
                missing.push(name.to_string());
            }
            String::new()
        })
    });

    if !missing.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "Missing environment variables: {}",
            missing.join(", ")
        )));
    }

    Ok(output.into_owned())
}
