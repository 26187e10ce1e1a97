//! In-memory storage client
//!
//! A complete, process-local implementation of [`StorageClient`]. Each
//! account owns an identifier-addressed tree. Downloads are served lazily in
//! fixed-size chunks and uploads are staged until the whole stream has been
//! consumed, so an aborted upload never becomes visible.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha512};
use tracing::{debug, trace, warn};

use crate::client::{
    ByteStream, Capabilities, HashType, RemoteDirectory, RemoteFile, RemoteId, RemoteItem,
    StorageClient, UploadMetadata,
};
use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::{FilenError, Result};
use crate::session::{Credentials, SessionConnector};

#[derive(Debug, Clone)]
enum NodeKind {
    Directory {
        /// Child ids in creation order
        children: Vec<RemoteId>,
    },
    File {
        data: Bytes,
        last_modified: DateTime<Utc>,
        sha512: String,
    },
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    parent: Option<RemoteId>,
    created: DateTime<Utc>,
    kind: NodeKind,
}

struct Tree {
    root: RemoteId,
    nodes: HashMap<RemoteId, Node>,
}

impl Tree {
    fn new() -> Self {
        let root = new_id();
        let mut nodes = HashMap::new();
        nodes.insert(
            root.clone(),
            Node {
                name: String::new(),
                parent: None,
                created: Utc::now(),
                kind: NodeKind::Directory {
                    children: Vec::new(),
                },
            },
        );
        Self { root, nodes }
    }

    fn node(&self, id: &RemoteId) -> Result<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| FilenError::NotFound(format!("No item with id {}", id)))
    }

    fn children(&self, dir: &RemoteId) -> Result<&[RemoteId]> {
        match &self.node(dir)?.kind {
            NodeKind::Directory { children } => Ok(children),
            NodeKind::File { .. } => Err(FilenError::NotADirectory(dir.to_string())),
        }
    }

    fn children_mut(&mut self, dir: &RemoteId) -> Result<&mut Vec<RemoteId>> {
        let node = self
            .nodes
            .get_mut(dir)
            .ok_or_else(|| FilenError::NotFound(format!("No item with id {}", dir)))?;
        match &mut node.kind {
            NodeKind::Directory { children } => Ok(children),
            NodeKind::File { .. } => Err(FilenError::NotADirectory(dir.to_string())),
        }
    }

    fn child_named(&self, dir: &RemoteId, name: &str) -> Result<Option<RemoteId>> {
        Ok(self
            .children(dir)?
            .iter()
            .find(|id| self.nodes.get(*id).is_some_and(|n| n.name == name))
            .cloned())
    }

    fn item(&self, id: &RemoteId) -> Result<RemoteItem> {
        let node = self.node(id)?;
        Ok(match &node.kind {
            NodeKind::Directory { .. } => RemoteItem::Directory(directory_record(id, node)),
            NodeKind::File { .. } => RemoteItem::File(file_record(id, node)?),
        })
    }

    /// Detach `id` from its parent and drop it with all descendants
    fn remove_subtree(&mut self, id: &RemoteId) {
        if let Some(parent) = self.nodes.get(id).and_then(|n| n.parent.clone()) {
            if let Ok(children) = self.children_mut(&parent) {
                children.retain(|c| c != id);
            }
        }

        let mut pending = vec![id.clone()];
        while let Some(next) = pending.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                if let NodeKind::Directory { children } = node.kind {
                    pending.extend(children);
                }
            }
        }
    }
}

fn new_id() -> RemoteId {
    RemoteId::new(uuid::Uuid::new_v4().to_string())
}

fn directory_record(id: &RemoteId, node: &Node) -> RemoteDirectory {
    RemoteDirectory {
        id: id.clone(),
        parent: node.parent.clone(),
        name: node.name.clone(),
        created: node.created,
    }
}

fn file_record(id: &RemoteId, node: &Node) -> Result<RemoteFile> {
    match &node.kind {
        NodeKind::File {
            data,
            last_modified,
            sha512,
        } => Ok(RemoteFile {
            id: id.clone(),
            parent: node
                .parent
                .clone()
                .ok_or_else(|| FilenError::Backend(format!("File {} has no parent", id)))?,
            name: node.name.clone(),
            size: data.len() as u64,
            last_modified: *last_modified,
            hashes: vec![(HashType::Sha512, sha512.clone())],
        }),
        NodeKind::Directory { .. } => Err(FilenError::IsADirectory(id.to_string())),
    }
}

fn file_content(tree: &RwLock<Tree>, id: &RemoteId) -> Result<Bytes> {
    let tree = tree.read();
    match &tree.node(id)?.kind {
        NodeKind::File { data, .. } => Ok(data.clone()),
        NodeKind::Directory { .. } => Err(FilenError::IsADirectory(id.to_string())),
    }
}

/// In-memory client configuration
#[derive(Debug, Clone)]
pub struct MemoryClientConfig {
    /// Size of each chunk served by downloads
    pub chunk_size: usize,
}

impl Default for MemoryClientConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Counters describing transfer activity
#[derive(Debug, Default)]
struct TransferStats {
    /// Download streams currently alive
    active_downloads: AtomicUsize,
    /// Chunks handed out by all downloads
    chunks_served: AtomicU64,
    /// Uploads that were aborted before commit
    aborted_uploads: AtomicU64,
}

/// Process-local storage client
///
/// Cloning is cheap; clones share the same tree.
#[derive(Clone)]
pub struct MemoryClient {
    tree: Arc<RwLock<Tree>>,
    config: MemoryClientConfig,
    stats: Arc<TransferStats>,
    /// Fail the next upload once this many bytes have been received
    upload_failure: Arc<Mutex<Option<u64>>>,
}

impl MemoryClient {
    pub fn new(config: MemoryClientConfig) -> Self {
        Self {
            tree: Arc::new(RwLock::new(Tree::new())),
            config,
            stats: Arc::new(TransferStats::default()),
            upload_failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Make the next upload fail with a transport error after `bytes` bytes
    pub fn fail_next_upload_after(&self, bytes: u64) {
        *self.upload_failure.lock() = Some(bytes);
    }

    /// Number of download streams that have not been dropped yet
    pub fn active_downloads(&self) -> usize {
        self.stats.active_downloads.load(Ordering::SeqCst)
    }

    /// Total chunks handed out by downloads
    pub fn chunks_served(&self) -> u64 {
        self.stats.chunks_served.load(Ordering::SeqCst)
    }

    /// Uploads that were aborted before commit
    pub fn aborted_uploads(&self) -> u64 {
        self.stats.aborted_uploads.load(Ordering::SeqCst)
    }

    /// Total number of files and directories, root excluded
    pub fn item_count(&self) -> usize {
        self.tree.read().nodes.len() - 1
    }

    /// Place a file without going through the streaming upload path
    pub fn insert_file(
        &self,
        parent: &RemoteId,
        name: &str,
        data: impl Into<Bytes>,
    ) -> Result<RemoteFile> {
        self.commit_file(parent, name, data.into(), Utc::now())
    }

    /// Write a file into the tree, replacing any file with the same name
    fn commit_file(
        &self,
        parent: &RemoteId,
        name: &str,
        data: Bytes,
        last_modified: DateTime<Utc>,
    ) -> Result<RemoteFile> {
        let sha512 = hex::encode(Sha512::digest(&data));
        let id = new_id();
        let node = Node {
            name: name.to_string(),
            parent: Some(parent.clone()),
            created: Utc::now(),
            kind: NodeKind::File {
                data,
                last_modified,
                sha512,
            },
        };
        let record = file_record(&id, &node)?;

        let mut tree = self.tree.write();
        let previous = tree.child_named(parent, name)?;
        if let Some(previous) = &previous {
            if matches!(tree.node(previous)?.kind, NodeKind::Directory { .. }) {
                return Err(FilenError::AlreadyExists(format!(
                    "A directory named {:?} already exists",
                    name
                )));
            }
        }

        tree.nodes.insert(id.clone(), node);
        let children = tree.children_mut(parent)?;
        match &previous {
            Some(previous) => {
                if let Some(slot) = children.iter_mut().find(|c| *c == previous) {
                    *slot = id.clone();
                }
            }
            None => children.push(id.clone()),
        }
        if let Some(previous) = previous {
            tree.nodes.remove(&previous);
        }

        Ok(record)
    }
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new(MemoryClientConfig::default())
    }
}

#[async_trait]
impl StorageClient for MemoryClient {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            hashes: vec![HashType::Sha512],
            set_mtime: true,
        }
    }

    async fn root(&self) -> Result<RemoteDirectory> {
        let tree = self.tree.read();
        let node = tree.node(&tree.root)?;
        Ok(directory_record(&tree.root, node))
    }

    async fn find_child(&self, parent: &RemoteId, name: &str) -> Result<Option<RemoteItem>> {
        trace!("find_child: parent={} name={}", parent, name);
        let tree = self.tree.read();
        match tree.child_named(parent, name)? {
            Some(id) => Ok(Some(tree.item(&id)?)),
            None => Ok(None),
        }
    }

    async fn list_children(
        &self,
        dir: &RemoteId,
    ) -> Result<(Vec<RemoteFile>, Vec<RemoteDirectory>)> {
        let tree = self.tree.read();
        let mut files = Vec::new();
        let mut directories = Vec::new();
        for id in tree.children(dir)? {
            match tree.item(id)? {
                RemoteItem::File(f) => files.push(f),
                RemoteItem::Directory(d) => directories.push(d),
            }
        }
        Ok((files, directories))
    }

    async fn create_directory(&self, parent: &RemoteId, name: &str) -> Result<RemoteDirectory> {
        let mut tree = self.tree.write();
        if tree.child_named(parent, name)?.is_some() {
            return Err(FilenError::AlreadyExists(format!(
                "{:?} already exists in {}",
                name, parent
            )));
        }

        let id = new_id();
        let node = Node {
            name: name.to_string(),
            parent: Some(parent.clone()),
            created: Utc::now(),
            kind: NodeKind::Directory {
                children: Vec::new(),
            },
        };
        let record = directory_record(&id, &node);
        tree.nodes.insert(id.clone(), node);
        tree.children_mut(parent)?.push(id);

        debug!("create_directory: {} in {}", name, parent);
        Ok(record)
    }

    async fn remove_directory(&self, dir: &RemoteId) -> Result<()> {
        let mut tree = self.tree.write();
        if *dir == tree.root {
            return Err(FilenError::InvalidPath(
                "The account root cannot be removed".to_string(),
            ));
        }
        tree.children(dir)?;
        tree.remove_subtree(dir);
        Ok(())
    }

    async fn remove_file(&self, file: &RemoteId) -> Result<()> {
        let mut tree = self.tree.write();
        if let NodeKind::Directory { .. } = tree.node(file)?.kind {
            return Err(FilenError::IsADirectory(file.to_string()));
        }
        tree.remove_subtree(file);
        Ok(())
    }

    fn download(&self, file: &RemoteFile, offset: u64) -> ByteStream {
        let tree = self.tree.clone();
        let stats = self.stats.clone();
        let id = file.id.clone();
        let chunk_size = self.config.chunk_size.max(1);

        Box::pin(try_stream! {
            stats.active_downloads.fetch_add(1, Ordering::SeqCst);
            let _connection = scopeguard::guard(stats.clone(), |stats| {
                stats.active_downloads.fetch_sub(1, Ordering::SeqCst);
            });

            let data = file_content(&tree, &id)?;
            let mut offset = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
            while offset < data.len() {
                // Each chunk is a separate fetch, aligned to chunk boundaries
                tokio::task::yield_now().await;
                let end = ((offset / chunk_size + 1) * chunk_size).min(data.len());
                stats.chunks_served.fetch_add(1, Ordering::SeqCst);
                yield data.slice(offset..end);
                offset = end;
            }
        })
    }

    async fn upload(&self, mut data: ByteStream, metadata: UploadMetadata) -> Result<RemoteFile> {
        let fail_after = self.upload_failure.lock().take();
        let mut staged = BytesMut::new();

        let abort = |err: FilenError| {
            self.stats.aborted_uploads.fetch_add(1, Ordering::SeqCst);
            warn!("upload of {:?} aborted: {}", metadata.name, err);
            err
        };

        loop {
            if let Some(limit) = fail_after {
                if staged.len() as u64 >= limit {
                    return Err(abort(FilenError::Backend(
                        "connection reset during upload".to_string(),
                    )));
                }
            }
            match data.next().await {
                Some(Ok(chunk)) => staged.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(abort(e)),
                None => break,
            }
        }

        if let Some(size) = metadata.size {
            if size != staged.len() as u64 {
                return Err(abort(FilenError::Backend(format!(
                    "declared {} bytes but received {}",
                    size,
                    staged.len()
                ))));
            }
        }

        debug!(
            "upload: committing {} bytes as {:?} in {}",
            staged.len(),
            metadata.name,
            metadata.parent
        );
        self.commit_file(
            &metadata.parent,
            &metadata.name,
            staged.freeze(),
            metadata.last_modified,
        )
    }

    async fn set_modified(&self, file: &RemoteId, time: DateTime<Utc>) -> Result<RemoteFile> {
        let mut tree = self.tree.write();
        let node = tree
            .nodes
            .get_mut(file)
            .ok_or_else(|| FilenError::NotFound(format!("No item with id {}", file)))?;
        match &mut node.kind {
            NodeKind::File { last_modified, .. } => *last_modified = time,
            NodeKind::Directory { .. } => {
                return Err(FilenError::IsADirectory(file.to_string()));
            }
        }
        file_record(file, node)
    }
}

/// Session connector backed by in-memory accounts
#[derive(Default)]
pub struct MemoryConnector {
    accounts: HashMap<String, (String, MemoryClient)>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account, returning the connector for chaining
    pub fn with_account(mut self, email: &str, password: &str, client: MemoryClient) -> Self {
        self.accounts
            .insert(email.to_string(), (password.to_string(), client));
        self
    }

    /// The client behind an account, for inspection
    pub fn account(&self, email: &str) -> Option<MemoryClient> {
        self.accounts.get(email).map(|(_, client)| client.clone())
    }
}

#[async_trait]
impl SessionConnector for MemoryConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn StorageClient>> {
        if credentials.email.is_empty() || credentials.password.is_empty() {
            return Err(FilenError::Config(
                "email and password are required".to_string(),
            ));
        }

        match self.accounts.get(&credentials.email) {
            Some((password, client)) if password == credentials.password.expose() => {
                debug!("session established for {}", credentials.email);
                Ok(Arc::new(client.clone()))
            }
            _ => Err(FilenError::Auth(format!(
                "invalid email or password for {}",
                credentials.email
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn body(chunks: Vec<&'static [u8]>) -> ByteStream {
        Box::pin(stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))),
        ))
    }

    fn upload_meta(parent: &RemoteId, name: &str, size: Option<u64>) -> UploadMetadata {
        UploadMetadata {
            parent: parent.clone(),
            name: name.to_string(),
            size,
            last_modified: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_directory_conflict() {
        let client = MemoryClient::default();
        let root = client.root().await.unwrap().id;

        client.create_directory(&root, "docs").await.unwrap();
        let err = client.create_directory(&root, "docs").await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_download_is_chunked() {
        let client = MemoryClient::new(MemoryClientConfig { chunk_size: 4 });
        let root = client.root().await.unwrap().id;
        let file = client.insert_file(&root, "a.bin", &b"0123456789"[..]).unwrap();

        let chunks: Vec<Bytes> = client
            .download(&file, 0)
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], Bytes::from_static(b"89"));
        assert_eq!(client.active_downloads(), 0);
    }

    #[tokio::test]
    async fn test_download_from_offset_skips_earlier_chunks() {
        let client = MemoryClient::new(MemoryClientConfig { chunk_size: 4 });
        let root = client.root().await.unwrap().id;
        let file = client.insert_file(&root, "a.bin", &b"0123456789"[..]).unwrap();

        let chunks: Vec<Bytes> = client
            .download(&file, 6)
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec![Bytes::from_static(b"67"), Bytes::from_static(b"89")]);
        assert_eq!(client.chunks_served(), 2);

        let past_end: Vec<_> = client.download(&file, 42).collect().await;
        assert!(past_end.is_empty());
        assert_eq!(client.chunks_served(), 2);
    }

    #[test]
    fn test_default_chunk_size_matches_transfer_default() {
        assert_eq!(
            MemoryClientConfig::default().chunk_size,
            crate::config::TransferConfig::default().chunk_size
        );
    }

    #[tokio::test]
    async fn test_dropped_download_releases_connection() {
        let client = MemoryClient::new(MemoryClientConfig { chunk_size: 2 });
        let root = client.root().await.unwrap().id;
        let file = client.insert_file(&root, "a.bin", &b"abcdefgh"[..]).unwrap();

        let mut stream = client.download(&file, 0);
        stream.next().await.unwrap().unwrap();
        assert_eq!(client.active_downloads(), 1);

        drop(stream);
        assert_eq!(client.active_downloads(), 0);
        assert_eq!(client.chunks_served(), 1);
    }

    #[tokio::test]
    async fn test_upload_replaces_existing_file_in_place() {
        let client = MemoryClient::default();
        let root = client.root().await.unwrap().id;
        client.insert_file(&root, "first", &b"1"[..]).unwrap();
        let old = client.insert_file(&root, "target", &b"old"[..]).unwrap();

        let new = client
            .upload(body(vec![b"new ", b"content"]), upload_meta(&root, "target", None))
            .await
            .unwrap();

        assert_ne!(old.id, new.id);
        assert_eq!(new.size, 11);
        let (files, _) = client.list_children(&root).await.unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["first", "target"]);
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_previous_content() {
        let client = MemoryClient::default();
        let root = client.root().await.unwrap().id;
        let old = client.insert_file(&root, "keep", &b"original"[..]).unwrap();

        client.fail_next_upload_after(3);
        let err = client
            .upload(body(vec![b"abc", b"def"]), upload_meta(&root, "keep", None))
            .await
            .unwrap_err();
        assert!(matches!(err, FilenError::Backend(_)));
        assert_eq!(client.aborted_uploads(), 1);

        match client.find_child(&root, "keep").await.unwrap() {
            Some(RemoteItem::File(f)) => {
                assert_eq!(f.id, old.id);
                assert_eq!(f.size, 8);
            }
            other => panic!("Expected file, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upload_size_mismatch_aborts() {
        let client = MemoryClient::default();
        let root = client.root().await.unwrap().id;

        let err = client
            .upload(body(vec![b"abc"]), upload_meta(&root, "short", Some(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, FilenError::Backend(_)));
        assert!(client.find_child(&root, "short").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upload_over_directory_rejected() {
        let client = MemoryClient::default();
        let root = client.root().await.unwrap().id;
        client.create_directory(&root, "docs").await.unwrap();

        let err = client
            .upload(body(vec![b"x"]), upload_meta(&root, "docs", None))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_remove_directory_is_recursive() {
        let client = MemoryClient::default();
        let root = client.root().await.unwrap().id;
        let dir = client.create_directory(&root, "a").await.unwrap();
        let sub = client.create_directory(&dir.id, "b").await.unwrap();
        client.insert_file(&sub.id, "c.txt", &b"c"[..]).unwrap();
        assert_eq!(client.item_count(), 3);

        client.remove_directory(&dir.id).await.unwrap();
        assert_eq!(client.item_count(), 0);
        assert!(client.remove_directory(&root).await.is_err());
    }

    #[tokio::test]
    async fn test_sha512_reported() {
        let client = MemoryClient::default();
        let root = client.root().await.unwrap().id;
        let file = client.insert_file(&root, "empty", Bytes::new()).unwrap();
        assert_eq!(
            file.hash(HashType::Sha512),
            Some(
                "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce\
                 47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3e"
            )
        );
        assert_eq!(file.hash(HashType::Md5), None);
    }

    #[tokio::test]
    async fn test_connector_rejects_bad_password() {
        let connector =
            MemoryConnector::new().with_account("me@example.com", "right", MemoryClient::default());

        let err = connector
            .connect(&Credentials::new("me@example.com", "wrong"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FilenError::Auth(_)));

        let err = connector
            .connect(&Credentials::new("me@example.com", ""))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, FilenError::Config(_)));

        assert!(connector
            .connect(&Credentials::new("me@example.com", "right"))
            .await
            .is_ok());
    }
}
