//! Storage client contract
//!
//! The adapter never speaks the remote protocol itself. Everything that
//! touches the wire (authentication, encryption, chunked transfer, retries)
//! lives behind [`StorageClient`]. The trait is identifier-addressed: the
//! path layer in [`crate::fs`] maps virtual paths onto these identifiers.

pub mod memory;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;

use crate::error::{FilenError, Result};

/// Opaque handle the remote store uses to address a file or directory
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content hash kinds a store may be able to supply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashType {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashType::Md5 => "md5",
            HashType::Sha1 => "sha1",
            HashType::Sha256 => "sha256",
            HashType::Sha512 => "sha512",
        };
        f.write_str(name)
    }
}

/// File record as reported by the store
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub id: RemoteId,
    /// Directory the file lives in
    pub parent: RemoteId,
    pub name: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    /// Hashes the store knows for this content, keyed by kind
    pub hashes: Vec<(HashType, String)>,
}

impl RemoteFile {
    pub fn hash(&self, kind: HashType) -> Option<&str> {
        self.hashes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, v)| v.as_str())
    }
}

/// Directory record as reported by the store
#[derive(Debug, Clone)]
pub struct RemoteDirectory {
    pub id: RemoteId,
    /// None for the account root
    pub parent: Option<RemoteId>,
    pub name: String,
    pub created: DateTime<Utc>,
}

/// A child looked up by name
#[derive(Debug, Clone)]
pub enum RemoteItem {
    File(RemoteFile),
    Directory(RemoteDirectory),
}

impl RemoteItem {
    pub fn id(&self) -> &RemoteId {
        match self {
            RemoteItem::File(f) => &f.id,
            RemoteItem::Directory(d) => &d.id,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, RemoteItem::Directory(_))
    }
}

/// Metadata sent alongside an upload
#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub parent: RemoteId,
    pub name: String,
    /// Declared length, if the caller knows it
    pub size: Option<u64>,
    pub last_modified: DateTime<Utc>,
}

/// Client capabilities declaration
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// Hash kinds the store can report for file content
    pub hashes: Vec<HashType>,
    /// Can update a file's last-modified time in place
    pub set_mtime: bool,
}

/// Lazy byte stream used for both directions of a transfer.
///
/// An `Err` item terminates the transfer. For uploads the client must treat
/// it as an abort and leave no partial object behind.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Identifier-addressed session with the remote store
///
/// One value is shared by every operation on a filesystem, so implementations
/// must tolerate concurrent calls. Streams returned by [`download`] own their
/// connection and release it when dropped.
///
/// [`download`]: StorageClient::download
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Get client capabilities
    fn capabilities(&self) -> Capabilities;

    /// The account's base folder
    async fn root(&self) -> Result<RemoteDirectory>;

    /// Look up a direct child of `parent` by name
    async fn find_child(&self, parent: &RemoteId, name: &str) -> Result<Option<RemoteItem>>;

    /// List the direct children of a directory as `(files, directories)`
    async fn list_children(
        &self,
        dir: &RemoteId,
    ) -> Result<(Vec<RemoteFile>, Vec<RemoteDirectory>)>;

    /// Create a directory
    ///
    /// Fails with `AlreadyExists` if `parent` already has a child called `name`.
    async fn create_directory(&self, parent: &RemoteId, name: &str) -> Result<RemoteDirectory>;

    /// Remove a directory and everything below it
    async fn remove_directory(&self, dir: &RemoteId) -> Result<()>;

    /// Remove a file
    async fn remove_file(&self, file: &RemoteId) -> Result<()>;

    /// Stream a file's content from byte `offset` to the end
    ///
    /// Nothing is fetched until the stream is polled; each poll fetches at
    /// most one chunk. Chunks before the one holding `offset` are never
    /// fetched. An offset at or past the end yields an empty stream.
    fn download(&self, file: &RemoteFile, offset: u64) -> ByteStream;

    /// Upload content as a file named `metadata.name` in `metadata.parent`
    ///
    /// An existing file with the same name is replaced only once the whole
    /// stream has been consumed successfully.
    async fn upload(&self, data: ByteStream, metadata: UploadMetadata) -> Result<RemoteFile>;

    /// Update a file's last-modified time
    ///
    /// Default implementation returns Unsupported
    async fn set_modified(&self, _file: &RemoteId, _time: DateTime<Utc>) -> Result<RemoteFile> {
        Err(FilenError::Unsupported(
            "setting modification time".to_string(),
        ))
    }
}
