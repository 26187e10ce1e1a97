//! Opening filesystems from configuration
//!
//! Tests the path from a YAML file on disk, through the registry, to a live
//! filesystem, including the credential failures along the way.

mod common;

use anyhow::Result;
use common::*;
use filen_adapter::client::memory::MemoryClient;
use filen_adapter::config::Config;
use filen_adapter::FilenError;
use std::io::Write;

fn write_config(content: &str) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(content.as_bytes())?;
    Ok(file)
}

/// Two remotes on one account see each other's files through their roots
#[tokio::test]
async fn test_remotes_share_account() -> Result<()> {
    init_logging();
    std::env::set_var("FILEN_REGISTRY_TEST_PASSWORD", PASSWORD);

    let file = write_config(&format!(
        r#"
defaults:
  email: {}
  password: ${{FILEN_REGISTRY_TEST_PASSWORD}}
remotes:
  - name: everything
  - name: photos
    root: Pictures
"#,
        EMAIL
    ))?;
    let config = Config::from_file(file.path())?;
    config.validate()?;

    let client = MemoryClient::default();
    let registry = test_registry(&client)?;
    let everything = registry.new_fs(config.remote("everything").unwrap()).await?;
    let photos = registry.new_fs(config.remote("photos").unwrap()).await?;

    put_bytes(&photos, "cat.jpg", b"meow").await?;
    assert_eq!(read_object(&everything, "Pictures/cat.jpg").await?, b"meow");

    std::env::remove_var("FILEN_REGISTRY_TEST_PASSWORD");
    Ok(())
}

/// Bad credentials are reported as an authentication failure
#[tokio::test]
async fn test_wrong_password() -> Result<()> {
    let config = Config::from_str(&format!(
        "remotes:\n  - name: docs\n    email: {}\n    password: guessed\n",
        EMAIL
    ))?;

    let registry = test_registry(&MemoryClient::default())?;
    let err = registry.new_fs(&config.remotes[0]).await.unwrap_err();
    assert!(matches!(err, FilenError::Auth(_)));
    assert!(!err.to_string().contains("guessed"));
    Ok(())
}

/// An unknown backend name is a configuration error
#[tokio::test]
async fn test_unknown_backend() -> Result<()> {
    let config = Config::from_str(&format!(
        "remotes:\n  - name: docs\n    backend: ftp\n    email: {}\n    password: x\n",
        EMAIL
    ))?;

    let registry = test_registry(&MemoryClient::default())?;
    let err = registry.new_fs(&config.remotes[0]).await.unwrap_err();
    assert!(matches!(err, FilenError::Config(_)));
    Ok(())
}

/// A root that names a file cannot be opened
#[tokio::test]
async fn test_root_is_file() -> Result<()> {
    let client = MemoryClient::default();
    let registry = test_registry(&client)?;

    let config = Config::from_str(&test_config("/"))?;
    let fs = registry.new_fs(&config.remotes[0]).await?;
    put_bytes(&fs, "notes.txt", b"plain file").await?;

    let config = Config::from_str(&test_config("notes.txt"))?;
    let err = registry.new_fs(&config.remotes[0]).await.unwrap_err();
    assert!(matches!(err, FilenError::NotADirectory(_)));
    Ok(())
}
