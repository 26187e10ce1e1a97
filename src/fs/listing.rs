//! Directory listing
//!
//! Entries come back in the store's order: directories first, then files,
//! each group as the store reported it. Nothing is sorted here, so callers
//! must not rely on the order being stable between calls.

use tracing::trace;

use crate::client::RemoteId;
use crate::error::Result;
use crate::fs::entry::{DirEntry, Directory, File};
use crate::fs::resolver::{join, ItemKind};
use crate::fs::Filesystem;

/// List a resolved directory. `dir` is the caller-relative path used to
/// build each child's path.
pub(crate) async fn list_directory(
    fs: &Filesystem,
    dir_id: &RemoteId,
    dir: &str,
) -> Result<Vec<DirEntry>> {
    let (files, directories) = fs.client().list_children(dir_id).await?;
    trace!(
        "list {:?}: {} directories, {} files",
        dir,
        directories.len(),
        files.len()
    );

    let mut entries = Vec::with_capacity(files.len() + directories.len());
    for record in directories {
        let remote = join(dir, &record.name);
        fs.resolver()
            .remember(&remote, record.id.clone(), ItemKind::Directory);
        entries.push(DirEntry::Directory(Directory::new(fs.clone(), remote, record)));
    }
    for record in files {
        let remote = join(dir, &record.name);
        entries.push(DirEntry::File(File::new(fs.clone(), remote, record)));
    }

    Ok(entries)
}
