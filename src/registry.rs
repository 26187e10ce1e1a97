//! Backend registry
//!
//! Maps backend names to the connector that opens sessions for them. A
//! registry is built once at startup and handed to whatever needs to open
//! filesystems from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::config::RemoteConfig;
use crate::error::{FilenError, Result};
use crate::fs::Filesystem;
use crate::session::SessionConnector;

/// Description of one configuration option a backend understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSpec {
    pub name: &'static str,
    pub help: &'static str,
    pub required: bool,
    /// Never echoed back to the user
    pub sensitive: bool,
}

/// Registration info for a backend
#[derive(Debug, Clone)]
pub struct RegInfo {
    pub name: String,
    pub description: String,
    pub options: Vec<OptionSpec>,
}

impl RegInfo {
    /// Info for a backend that signs in with an account email and password
    pub fn with_credentials(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            options: vec![
                OptionSpec {
                    name: "email",
                    help: "Account email",
                    required: true,
                    sensitive: false,
                },
                OptionSpec {
                    name: "password",
                    help: "Account password",
                    required: true,
                    sensitive: true,
                },
                OptionSpec {
                    name: "root",
                    help: "Path prefix inside the account",
                    required: false,
                    sensitive: false,
                },
            ],
        }
    }

    pub fn option(&self, name: &str) -> Option<&OptionSpec> {
        self.options.iter().find(|o| o.name == name)
    }
}

struct Backend {
    info: RegInfo,
    connector: Arc<dyn SessionConnector>,
}

/// Registered backends, keyed by name
#[derive(Default)]
pub struct Registry {
    backends: HashMap<String, Backend>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under `info.name`
    pub fn register(&mut self, info: RegInfo, connector: Arc<dyn SessionConnector>) -> Result<()> {
        if self.backends.contains_key(&info.name) {
            return Err(FilenError::AlreadyExists(format!(
                "Backend {:?} is already registered",
                info.name
            )));
        }
        self.backends
            .insert(info.name.clone(), Backend { info, connector });
        Ok(())
    }

    pub fn info(&self, name: &str) -> Option<&RegInfo> {
        self.backends.get(name).map(|b| &b.info)
    }

    /// All registered backends, sorted by name
    pub fn backends(&self) -> Vec<&RegInfo> {
        let mut infos: Vec<_> = self.backends.values().map(|b| &b.info).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Open a session for a configured remote and bind it to its root
    pub async fn new_fs(&self, remote: &RemoteConfig) -> Result<Filesystem> {
        let backend = self.backends.get(&remote.backend).ok_or_else(|| {
            FilenError::Config(format!(
                "Remote {:?} uses unknown backend {:?}",
                remote.name, remote.backend
            ))
        })?;

        for option in backend.info.options.iter().filter(|o| o.required) {
            if option_value(remote, option.name).map_or(true, str::is_empty) {
                return Err(FilenError::Config(format!(
                    "Remote {:?}: option {:?} is required",
                    remote.name, option.name
                )));
            }
        }

        info!("Connecting remote {:?} ({})", remote.name, remote.backend);
        let client = backend.connector.connect(&remote.credentials).await?;
        let fs = Filesystem::new(
            remote.name.clone(),
            &remote.root,
            client,
            remote.transfer.clone(),
        )
        .await?;

        info!("Remote {:?} ready: {}", remote.name, fs);
        Ok(fs)
    }
}

fn option_value<'a>(remote: &'a RemoteConfig, name: &str) -> Option<&'a str> {
    match name {
        "email" => Some(remote.credentials.email.as_str()),
        "password" => Some(remote.credentials.password.expose()),
        "root" => Some(remote.root.as_str()),
        _ => None,
    }
}
