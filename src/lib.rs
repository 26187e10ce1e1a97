//! filen-adapter: Filen cloud storage as a generic filesystem backend
//!
//! The remote store addresses files and folders by identifier; callers speak
//! slash-delimited paths. This crate sits in between: it resolves paths to
//! identifiers, turns listings into generic entries, and bridges streaming
//! reads and writes to the storage client.
//!
//! # Architecture
//!
//! - **Storage client** ([`client::StorageClient`]): the identifier-addressed
//!   collaborator that owns the wire protocol, encryption and authentication.
//!   [`client::memory::MemoryClient`] is a complete in-process implementation.
//! - **Path resolver** ([`fs::PathResolver`]): segment-by-segment lookup with a
//!   per-filesystem identifier cache.
//! - **Entries** ([`fs::DirEntry`]): `Directory` and `File` snapshots with the
//!   generic metadata contract. Only files stream.
//! - **Filesystem** ([`fs::Filesystem`]): the composition root binding a root
//!   prefix to a client session.
//! - **Registry** ([`registry::Registry`]): opens filesystems from
//!   configuration through registered session connectors.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use filen_adapter::client::memory::{MemoryClient, MemoryConnector};
//! use filen_adapter::config::Config;
//! use filen_adapter::registry::{RegInfo, Registry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file("filen.yaml".as_ref())?;
//! config.validate()?;
//! filen_adapter::logging::init(&config.logging)?;
//!
//! let connector = MemoryConnector::new()
//!     .with_account("me@example.com", "secret", MemoryClient::default());
//! let mut registry = Registry::new();
//! registry.register(RegInfo::with_credentials("filen", "Filen"), Arc::new(connector))?;
//!
//! for remote in &config.remotes {
//!     let fs = registry.new_fs(remote).await?;
//!     for entry in fs.list("").await? {
//!         println!("{}", entry);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod env;
pub mod error;
pub mod fs;
pub mod logging;
pub mod registry;
pub mod session;

pub use error::{FilenError, Result};
pub use fs::{DirEntry, Filesystem, ObjectInfo};
