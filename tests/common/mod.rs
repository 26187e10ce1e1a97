//! Common test utilities and fixtures
//!
//! Every test gets its own in-memory account, opened through the same path a
//! real deployment takes: YAML config, registry, session connector.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use filen_adapter::client::memory::{MemoryClient, MemoryClientConfig, MemoryConnector};
use filen_adapter::config::Config;
use filen_adapter::fs::{DirEntry, File, Filesystem, ObjectInfo, OpenOptions};
use filen_adapter::registry::{RegInfo, Registry};
use filen_adapter::FilenError;
use rand::RngCore;
use tracing_subscriber::EnvFilter;

pub const EMAIL: &str = "tester@example.com";
pub const PASSWORD: &str = "correct horse battery staple";

/// Download chunk size of the test account; small so that transfers span
/// many chunks
pub const CHUNK_SIZE: usize = 16;

/// Initialize logging for tests (call once per test run)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// Config for a single remote rooted at `root`
pub fn test_config(root: &str) -> String {
    format!(
        r#"
logging:
  level: debug
defaults:
  email: {email}
  password: "{password}"
  transfer:
    chunk_size: 32B
    chunk_timeout: 5s
remotes:
  - name: test
    backend: filen
    root: "{root}"
"#,
        email = EMAIL,
        password = PASSWORD,
        root = root,
    )
}

/// A registry with one in-memory account registered as the "filen" backend
pub fn test_registry(client: &MemoryClient) -> Result<Registry> {
    let connector = MemoryConnector::new().with_account(EMAIL, PASSWORD, client.clone());
    let mut registry = Registry::new();
    registry.register(
        RegInfo::with_credentials("filen", "Filen cloud storage (in memory)"),
        Arc::new(connector),
    )?;
    Ok(registry)
}

pub struct TestHarness {
    client: MemoryClient,
    fs: Filesystem,
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        Self::with_root("/").await
    }

    pub async fn with_root(root: &str) -> Result<Self> {
        init_logging();

        let client = MemoryClient::new(MemoryClientConfig {
            chunk_size: CHUNK_SIZE,
        });
        let config = Config::from_str(&test_config(root))?;
        config.validate()?;

        let remote = config.remote("test").context("test remote missing")?;
        let fs = test_registry(&client)?.new_fs(remote).await?;
        Ok(Self { client, fs })
    }

    pub fn fs(&self) -> &Filesystem {
        &self.fs
    }

    /// The account behind the filesystem, for inspection
    pub fn client(&self) -> &MemoryClient {
        &self.client
    }
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

/// Upload `data` to `remote` with its exact size declared
pub async fn put_bytes(fs: &Filesystem, remote: &str, data: &[u8]) -> Result<File> {
    let info = ObjectInfo::new(remote, Some(data.len() as u64), Utc::now());
    Ok(fs.put(Cursor::new(data.to_vec()), &info).await?)
}

/// Look up `remote` and read its whole content
pub async fn read_object(fs: &Filesystem, remote: &str) -> Result<Vec<u8>> {
    let file = fs.new_object(remote).await?;
    Ok(file.open(OpenOptions::default()).await?.read_all().await?)
}

pub fn entry_names(entries: &[DirEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.remote()).collect()
}

/// Assert that `new_object` reports `remote` as missing
pub async fn assert_not_found(fs: &Filesystem, remote: &str) {
    match fs.new_object(remote).await {
        Err(FilenError::NotFound(_)) => {}
        Err(e) => panic!("Expected NotFound for {:?}, got error {:?}", remote, e),
        Ok(file) => panic!("Expected NotFound for {:?}, got {:?}", remote, file),
    }
}
