//! Directory entries
//!
//! [`DirEntry`] values are read snapshots. They are built fresh by every
//! `list`/`new_object` call and do not follow later changes to the store.

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;
use tracing::debug;

use crate::client::{HashType, RemoteDirectory, RemoteFile, RemoteId, UploadMetadata};
use crate::error::{FilenError, Result};
use crate::fs::resolver::ItemKind;
use crate::fs::stream::{self, ObjectReader, OpenOptions};
use crate::fs::{Filesystem, ObjectInfo};

/// A listing entry: either a directory or a file
#[derive(Clone)]
pub enum DirEntry {
    Directory(Directory),
    File(File),
}

impl DirEntry {
    /// Path relative to the filesystem root
    pub fn remote(&self) -> &str {
        match self {
            DirEntry::Directory(d) => d.remote(),
            DirEntry::File(f) => f.remote(),
        }
    }

    pub fn fs(&self) -> &Filesystem {
        match self {
            DirEntry::Directory(d) => d.fs(),
            DirEntry::File(f) => f.fs(),
        }
    }

    pub fn mod_time(&self) -> DateTime<Utc> {
        match self {
            DirEntry::Directory(d) => d.mod_time(),
            DirEntry::File(f) => f.mod_time(),
        }
    }

    /// Size in bytes; None when unknown
    pub fn size(&self) -> Option<u64> {
        match self {
            DirEntry::Directory(d) => d.size(),
            DirEntry::File(f) => Some(f.size()),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, DirEntry::Directory(_))
    }

    pub fn as_file(&self) -> Option<&File> {
        match self {
            DirEntry::File(f) => Some(f),
            DirEntry::Directory(_) => None,
        }
    }

    pub fn as_directory(&self) -> Option<&Directory> {
        match self {
            DirEntry::Directory(d) => Some(d),
            DirEntry::File(_) => None,
        }
    }
}

impl fmt::Display for DirEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.remote())
    }
}

impl fmt::Debug for DirEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirEntry::Directory(d) => f.debug_tuple("Directory").field(&d.remote).finish(),
            DirEntry::File(file) => f.debug_tuple("File").field(&file.remote).finish(),
        }
    }
}

/// A directory snapshot
#[derive(Clone)]
pub struct Directory {
    fs: Filesystem,
    id: RemoteId,
    remote: String,
    /// Total size of the contents; None until computed
    size: Option<u64>,
    /// Number of direct children; None until computed
    items: Option<u64>,
    created: DateTime<Utc>,
}

impl Directory {
    pub(crate) fn new(fs: Filesystem, remote: String, record: RemoteDirectory) -> Self {
        Self {
            fs,
            id: record.id,
            remote,
            size: None,
            items: None,
            created: record.created,
        }
    }

    pub fn fs(&self) -> &Filesystem {
        &self.fs
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn id(&self) -> &RemoteId {
        &self.id
    }

    /// The store keeps no modification time for directories, so this is the
    /// creation time. Treat it as a best guess.
    pub fn mod_time(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn items(&self) -> Option<u64> {
        self.items
    }
}

impl fmt::Display for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.remote)
    }
}

/// A file snapshot with streaming access to its content
#[derive(Clone)]
pub struct File {
    fs: Filesystem,
    remote: String,
    record: RemoteFile,
}

impl File {
    pub(crate) fn new(fs: Filesystem, remote: String, record: RemoteFile) -> Self {
        Self { fs, remote, record }
    }

    pub fn fs(&self) -> &Filesystem {
        &self.fs
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn id(&self) -> &RemoteId {
        &self.record.id
    }

    pub fn size(&self) -> u64 {
        self.record.size
    }

    pub fn mod_time(&self) -> DateTime<Utc> {
        self.record.last_modified
    }

    /// Files of this backend can always be stored
    pub fn storable(&self) -> bool {
        true
    }

    /// Content hash of the given kind
    ///
    /// Fails with `Unsupported` unless the filesystem declares `kind`.
    /// `Ok(None)` means the kind is supported but unknown for this object.
    pub fn hash(&self, kind: HashType) -> Result<Option<String>> {
        if !self.fs.hashes().contains(&kind) {
            return Err(FilenError::Unsupported(format!("{} hash", kind)));
        }
        Ok(self.record.hash(kind).map(str::to_string))
    }

    /// Update the remote modification time
    pub async fn set_mod_time(&mut self, time: DateTime<Utc>) -> Result<()> {
        if !self.fs.features().set_mod_time {
            return Err(FilenError::Unsupported(
                "setting modification time".to_string(),
            ));
        }
        debug!("set_mod_time: {:?} -> {}", self.remote, time);
        self.record = self.fs.client().set_modified(&self.record.id, time).await?;
        Ok(())
    }

    /// Open the content for streaming reads
    pub async fn open(&self, options: OpenOptions) -> Result<ObjectReader> {
        debug!(
            "open: {:?} offset={} count={:?}",
            self.remote, options.offset, options.count
        );
        let start = options.start(self.record.size);
        let source = self.fs.client().download(&self.record, start);
        Ok(ObjectReader::new(
            source,
            self.record.size,
            options,
            self.fs.transfer().chunk_timeout,
        ))
    }

    /// Replace the content
    ///
    /// On failure the previous content stays in place and this snapshot is
    /// left unchanged.
    pub async fn update<R>(&mut self, reader: R, info: &ObjectInfo) -> Result<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let metadata = UploadMetadata {
            parent: self.record.parent.clone(),
            name: self.record.name.clone(),
            size: info.size,
            last_modified: info.mod_time,
        };
        let record = stream::upload(&self.fs, reader, metadata, info.cancel.clone()).await?;

        self.fs
            .resolver()
            .remember(&self.remote, record.id.clone(), ItemKind::File);
        self.record = record;
        Ok(())
    }

    /// Delete the remote object
    pub async fn remove(self) -> Result<()> {
        debug!("remove: {:?}", self.remote);
        let result = self.fs.client().remove_file(&self.record.id).await;
        self.fs.resolver().invalidate(&self.remote);
        result
    }
}

impl fmt::Display for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.remote)
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("remote", &self.remote)
            .field("id", &self.record.id)
            .field("size", &self.record.size)
            .finish()
    }
}
