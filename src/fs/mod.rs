//! Path-addressed filesystem over an identifier-addressed store
//!
//! [`Filesystem`] is the composition root: it binds a root prefix and a
//! storage client session, and implements the generic backend operations
//! (`list`, `new_object`, `put`, `mkdir`, `rmdir`) on top of the path
//! resolver, the directory listing and the streaming bridges.
//!
//! A `Filesystem` is cheap to clone and safe to share between tasks. The only
//! mutable state is the identifier cache, which uses sharded locking; no lock
//! is held while talking to the store.

pub mod entry;
mod listing;
pub mod resolver;
pub mod stream;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{HashType, RemoteId, RemoteItem, StorageClient, UploadMetadata};
use crate::config::TransferConfig;
use crate::error::{FilenError, Result};

pub use entry::{DirEntry, Directory, File};
pub use resolver::{ItemKind, PathResolver, Resolved};
pub use stream::{ObjectReader, OpenOptions};

use resolver::{normalize, split_parent};

/// Modification times are kept to the second
pub const PRECISION: Duration = Duration::from_secs(1);

/// Source object description for `put` and `update`
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    /// Destination path relative to the filesystem root
    pub remote: String,
    /// Exact length, if known. A source of a different length fails the upload.
    pub size: Option<u64>,
    pub mod_time: DateTime<Utc>,
    /// Abort the transfer when cancelled
    pub cancel: Option<CancellationToken>,
}

impl ObjectInfo {
    pub fn new(remote: impl Into<String>, size: Option<u64>, mod_time: DateTime<Utc>) -> Self {
        Self {
            remote: remote.into(),
            size,
            mod_time,
            cancel: None,
        }
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Optional features this filesystem offers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Features {
    /// `File::set_mod_time` changes the stored time
    pub set_mod_time: bool,
    /// Native move/rename
    pub rename: bool,
    /// Directory listings carry real sizes and item counts
    pub directory_size: bool,
}

struct FsInner {
    name: String,
    client: Arc<dyn StorageClient>,
    resolver: PathResolver,
    transfer: TransferConfig,
}

/// A remote account exposed as a filesystem rooted at a path prefix
#[derive(Clone)]
pub struct Filesystem {
    inner: Arc<FsInner>,
}

impl Filesystem {
    /// Bind a client session to a root prefix
    ///
    /// The root does not have to exist yet; it is created by the first
    /// `mkdir`, `put` or `list`. A root that names a file is rejected.
    pub async fn new(
        name: impl Into<String>,
        root: &str,
        client: Arc<dyn StorageClient>,
        transfer: TransferConfig,
    ) -> Result<Self> {
        let resolver = PathResolver::new(client.clone(), root)?;
        match resolver.resolve("", false).await {
            Ok(Resolved {
                kind: ItemKind::File,
                ..
            }) => {
                return Err(FilenError::NotADirectory(format!(
                    "root {:?} is a file",
                    resolver.root()
                )));
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                debug!("root {:?} does not exist yet", resolver.root());
            }
            Err(e) => return Err(e),
        }

        Ok(Self {
            inner: Arc::new(FsInner {
                name: name.into(),
                client,
                resolver,
                transfer,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn root(&self) -> &str {
        self.inner.resolver.root()
    }

    pub fn precision(&self) -> Duration {
        PRECISION
    }

    /// Hash kinds the store supplies
    pub fn hashes(&self) -> Vec<HashType> {
        self.inner.client.capabilities().hashes
    }

    pub fn features(&self) -> Features {
        let caps = self.inner.client.capabilities();
        Features {
            set_mod_time: caps.set_mtime,
            rename: false,
            directory_size: false,
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.inner.resolver
    }

    pub(crate) fn client(&self) -> &Arc<dyn StorageClient> {
        &self.inner.client
    }

    pub(crate) fn transfer(&self) -> &TransferConfig {
        &self.inner.transfer
    }

    /// Resolve `dir` and run `op` on its identifier
    ///
    /// Another session on the same account may have removed a directory this
    /// filesystem still has cached. When a `NotFound` comes back and part of
    /// the path was served from the cache, the cached chain is dropped and
    /// `op` runs once more against a fresh resolution.
    async fn with_dir<T, F, Fut>(&self, dir: &str, create: bool, op: F) -> Result<T>
    where
        F: Fn(RemoteId) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let resolver = &self.inner.resolver;
        let from_cache = resolver.cached_along(dir);

        let first = match resolver.resolve_dir(dir, create).await {
            Ok(id) => op(id).await,
            Err(e) => Err(e),
        };
        match first {
            Err(e) if e.is_not_found() && from_cache => {
                warn!("cached identifier under {:?} is gone ({}), resolving again", dir, e);
                resolver.forget(dir);
                let id = resolver.resolve_dir(dir, create).await?;
                op(id).await
            }
            result => result,
        }
    }

    /// List a directory, creating it if missing
    pub async fn list(&self, dir: &str) -> Result<Vec<DirEntry>> {
        let dir = normalize(dir)?;
        let path = dir.as_str();
        self.with_dir(path, true, |id| async move {
            listing::list_directory(self, &id, path).await
        })
        .await
    }

    /// Look up a file
    pub async fn new_object(&self, remote: &str) -> Result<File> {
        let remote = normalize(remote)?;
        let (parent, name) = split_parent(&remote);
        if name.is_empty() {
            return Err(FilenError::IsADirectory(self.root().to_string()));
        }

        let found = self
            .with_dir(parent, false, |id| async move {
                self.inner.client.find_child(&id, name).await
            })
            .await;

        match found {
            Ok(Some(RemoteItem::File(record))) => {
                self.inner
                    .resolver
                    .remember(&remote, record.id.clone(), ItemKind::File);
                Ok(File::new(self.clone(), remote, record))
            }
            Ok(Some(RemoteItem::Directory(_))) => Err(FilenError::IsADirectory(remote)),
            Ok(None) => {
                self.inner.resolver.invalidate(&remote);
                Err(FilenError::NotFound(remote))
            }
            Err(e) if e.is_not_found() => Err(FilenError::NotFound(remote)),
            Err(e) => Err(e),
        }
    }

    /// Upload a new file, replacing any file already at `info.remote`
    ///
    /// Missing parent directories are created.
    pub async fn put<R>(&self, reader: R, info: &ObjectInfo) -> Result<File>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let remote = normalize(&info.remote)?;
        let (parent, name) = split_parent(&remote);
        if name.is_empty() {
            return Err(FilenError::InvalidPath(format!(
                "{:?} has no file name",
                info.remote
            )));
        }

        // Looking the name up first confirms the parent still exists before
        // the reader is consumed
        let (parent_id, existing) = self
            .with_dir(parent, true, |id| async move {
                let existing = self.inner.client.find_child(&id, name).await?;
                Ok((id, existing))
            })
            .await?;
        if let Some(RemoteItem::Directory(_)) = existing {
            return Err(FilenError::IsADirectory(remote));
        }

        let metadata = UploadMetadata {
            parent: parent_id,
            name: name.to_string(),
            size: info.size,
            last_modified: info.mod_time,
        };

        let record = match stream::upload(self, reader, metadata, info.cancel.clone()).await {
            Ok(record) => record,
            Err(e) if e.is_already_exists() => return Err(FilenError::IsADirectory(remote)),
            Err(e) if e.is_not_found() => {
                warn!("parent of {:?} vanished during upload", remote);
                self.inner.resolver.forget(parent);
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        debug!("put: {:?} ({} bytes)", remote, record.size);

        self.inner
            .resolver
            .remember(&remote, record.id.clone(), ItemKind::File);
        Ok(File::new(self.clone(), remote, record))
    }

    /// Create a directory and any missing parents
    ///
    /// Succeeds if the directory already exists. The directory itself is
    /// always looked up in the store, never taken from the cache.
    pub async fn mkdir(&self, dir: &str) -> Result<()> {
        let dir = normalize(dir)?;
        debug!("mkdir: {:?}", dir);
        self.inner.resolver.invalidate(&dir);
        self.with_dir(&dir, true, |_| async { Ok(()) }).await
    }

    /// Remove an empty directory
    ///
    /// Succeeds if the directory is already gone.
    pub async fn rmdir(&self, dir: &str) -> Result<()> {
        let dir = normalize(dir)?;
        if self.inner.resolver.absolute(&dir)?.is_empty() {
            return Err(FilenError::InvalidPath(
                "the account root cannot be removed".to_string(),
            ));
        }

        let resolver = &self.inner.resolver;
        let listed = self
            .with_dir(&dir, false, |id| async move {
                let children = self.inner.client.list_children(&id).await?;
                Ok((id, children))
            })
            .await;
        let (id, (files, directories)) = match listed {
            Ok(listed) => listed,
            Err(e) if e.is_not_found() => {
                debug!("rmdir: {:?} already absent", dir);
                resolver.invalidate_recursive(&dir);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if !files.is_empty() || !directories.is_empty() {
            return Err(FilenError::NotEmpty(dir));
        }

        debug!("rmdir: {:?}", dir);
        match self.inner.client.remove_directory(&id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!("rmdir: {:?} removed concurrently", dir),
            Err(e) => return Err(e),
        }
        resolver.invalidate_recursive(&dir);
        Ok(())
    }
}

impl fmt::Display for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "filen root '{}'", self.root())
    }
}

impl fmt::Debug for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filesystem")
            .field("name", &self.inner.name)
            .field("root", &self.root())
            .finish()
    }
}
