//! Virtual path to remote identifier resolution
//!
//! Paths are walked one segment at a time from the account root. Every
//! identifier found on the way is cached, keyed by its absolute path (root
//! prefix included), so later lookups of the same path or any of its
//! ancestors do not touch the store.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace, warn};

use crate::client::{RemoteId, RemoteItem, StorageClient};
use crate::error::{FilenError, Result};

/// Kind of a resolved item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    File,
    Directory,
}

/// Result of resolving a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub id: RemoteId,
    pub kind: ItemKind,
}

impl From<&RemoteItem> for Resolved {
    fn from(item: &RemoteItem) -> Self {
        Self {
            id: item.id().clone(),
            kind: if item.is_dir() {
                ItemKind::Directory
            } else {
                ItemKind::File
            },
        }
    }
}

/// Normalize a slash-delimited path: no leading, trailing or repeated
/// slashes. `.` and `..` segments are rejected.
pub fn normalize(path: &str) -> Result<String> {
    let mut segments = Vec::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(FilenError::InvalidPath(format!(
                "relative segment {:?} in {:?}",
                segment, path
            )));
        }
        segments.push(segment);
    }
    Ok(segments.join("/"))
}

/// Join two normalized paths
pub fn join(base: &str, name: &str) -> String {
    match (base.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{}/{}", base, name),
    }
}

/// Split a normalized path into parent and leaf name
pub fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

/// Path resolver with a per-filesystem identifier cache
pub struct PathResolver {
    client: Arc<dyn StorageClient>,
    /// Normalized root prefix
    root: String,
    /// Absolute path -> identifier. The account root lives under "".
    cache: DashMap<String, Resolved>,
}

impl PathResolver {
    pub fn new(client: Arc<dyn StorageClient>, root: &str) -> Result<Self> {
        Ok(Self {
            client,
            root: normalize(root)?,
            cache: DashMap::new(),
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Prefix a caller-relative path with the root
    pub fn absolute(&self, remote: &str) -> Result<String> {
        Ok(join(&self.root, &normalize(remote)?))
    }

    /// Cached identifier for a caller-relative path, if any
    pub fn cached(&self, remote: &str) -> Option<Resolved> {
        let abs = self.absolute(remote).ok()?;
        self.cache.get(&abs).map(|entry| entry.value().clone())
    }

    /// Resolve a caller-relative path to its identifier
    ///
    /// With `create_intermediate`, missing segments (the last one included)
    /// are created as directories instead of failing with `NotFound`.
    pub async fn resolve(&self, remote: &str, create_intermediate: bool) -> Result<Resolved> {
        let abs = self.absolute(remote)?;

        let hit = self.cache.get(&abs).map(|entry| entry.value().clone());
        if let Some(hit) = hit {
            trace!("resolve: cache hit {:?} -> {}", abs, hit.id);
            return Ok(hit);
        }

        let segments: Vec<&str> = abs.split('/').filter(|s| !s.is_empty()).collect();
        let mut current = self.root_id().await?;
        let mut current_path = String::new();

        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            current_path = join(&current_path, segment);

            let hit = self.cache.get(&current_path).map(|entry| entry.value().clone());
            let resolved = match hit {
                Some(hit) => hit,
                None => {
                    let item = match self.client.find_child(&current.id, segment).await? {
                        Some(item) => item,
                        None if create_intermediate => {
                            self.create_segment(&current.id, segment, &current_path)
                                .await?
                        }
                        None => {
                            return Err(FilenError::NotFound(current_path));
                        }
                    };
                    let resolved = Resolved::from(&item);
                    self.cache.insert(current_path.clone(), resolved.clone());
                    resolved
                }
            };

            if !last && resolved.kind == ItemKind::File {
                return Err(FilenError::NotADirectory(current_path));
            }
            current = resolved;
        }

        trace!("resolve: {:?} -> {}", abs, current.id);
        Ok(current)
    }

    /// Resolve a path that must be a directory
    pub async fn resolve_dir(&self, remote: &str, create_intermediate: bool) -> Result<RemoteId> {
        let resolved = self.resolve(remote, create_intermediate).await?;
        match resolved.kind {
            ItemKind::Directory => Ok(resolved.id),
            ItemKind::File => Err(FilenError::NotADirectory(remote.to_string())),
        }
    }

    /// Record an identifier learned outside of `resolve`
    pub fn remember(&self, remote: &str, id: RemoteId, kind: ItemKind) {
        match self.absolute(remote) {
            Ok(abs) => {
                self.cache.insert(abs, Resolved { id, kind });
            }
            Err(e) => trace!("remember: not caching {:?}: {}", remote, e),
        }
    }

    /// Drop the cached identifier for a path
    pub fn invalidate(&self, remote: &str) {
        if let Ok(abs) = self.absolute(remote) {
            self.cache.remove(&abs);
        }
    }

    /// Drop the cached identifiers for a path and everything below it
    pub fn invalidate_recursive(&self, remote: &str) {
        let Ok(abs) = self.absolute(remote) else {
            return;
        };
        if abs.is_empty() {
            self.cache.retain(|k, _| k.is_empty());
            return;
        }
        let prefix = format!("{}/", abs);
        self.cache.retain(|k, _| k != &abs && !k.starts_with(&prefix));
    }

    /// Whether `remote` or any directory on the way to it has a cached
    /// identifier. The account root does not count.
    pub fn cached_along(&self, remote: &str) -> bool {
        let Ok(abs) = self.absolute(remote) else {
            return false;
        };
        let mut prefix = abs.as_str();
        loop {
            if !prefix.is_empty() && self.cache.contains_key(prefix) {
                return true;
            }
            match prefix.rfind('/') {
                Some(idx) => prefix = &prefix[..idx],
                None => return false,
            }
        }
    }

    /// Drop every cached identifier on the way to `remote`, and everything
    /// below it, so the next resolution walks from the account root
    ///
    /// Used when the store reports a cached identifier as gone. The account
    /// root is kept.
    pub fn forget(&self, remote: &str) {
        let Ok(abs) = self.absolute(remote) else {
            return;
        };
        self.invalidate_recursive(remote);
        let mut prefix = abs.as_str();
        while let Some(idx) = prefix.rfind('/') {
            prefix = &prefix[..idx];
            self.cache.remove(prefix);
        }
    }

    async fn root_id(&self) -> Result<Resolved> {
        let hit = self.cache.get("").map(|entry| entry.value().clone());
        if let Some(hit) = hit {
            return Ok(hit);
        }

        let root = self.client.root().await?;
        let resolved = Resolved {
            id: root.id,
            kind: ItemKind::Directory,
        };
        self.cache.insert(String::new(), resolved.clone());
        Ok(resolved)
    }

    /// Create a missing directory segment, tolerating a concurrent creator
    async fn create_segment(
        &self,
        parent: &RemoteId,
        name: &str,
        path: &str,
    ) -> Result<RemoteItem> {
        match self.client.create_directory(parent, name).await {
            Ok(dir) => {
                debug!("created directory {:?}", path);
                Ok(RemoteItem::Directory(dir))
            }
            Err(e) if e.is_already_exists() => {
                warn!("directory {:?} appeared concurrently, using existing", path);
                self.client
                    .find_child(parent, name)
                    .await?
                    .ok_or_else(|| FilenError::NotFound(path.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}
