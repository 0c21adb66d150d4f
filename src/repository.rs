//! # Repository Store (C4)
//!
//! The dual-index (SHA1, ETag) blob repository rooted at each mapping's
//! `backup_root`:
//!
//! ```text
//! <backup_root>/.data/sha1/<xx>/<38hex>
//! <backup_root>/.data/etag/<xx>/<rest>
//! <backup_root>/.data/**/*.downloading   (transient)
//! ```
//!
//! A blob's identity is its (device, inode) pair. [`InodeIndex`] keeps that
//! mapping in memory for the life of one process run: O(1) per lookup, with
//! no subprocess dependency.

use crate::error::RepoError;
use crate::hash::ChecksumTag;
use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

pub const REPOSITORY_DIRNAME: &str = ".data";
pub const SNAPSHOT_DIRNAME: &str = "snapshots";

/// Confirms `backup_root` can be created and written to, aborting the run
/// before any processing begins if not. Creates `backup_root` if it doesn't
/// exist yet, then proves writability with a throwaway probe file rather
/// than trusting Unix mode bits, since ACLs and read-only mounts don't show
/// up in them.
pub fn ensure_writable(backup_root: &Path) -> Result<(), RepoError> {
    fs::create_dir_all(backup_root)
        .map_err(|_| RepoError::NotWritable(backup_root.to_path_buf()))?;

    let probe = backup_root.join(".write-probe");
    fs::write(&probe, b"")
        .map_err(|_| RepoError::NotWritable(backup_root.to_path_buf()))?;
    let _ = fs::remove_file(&probe);

    Ok(())
}

/// Identity of a blob on a single filesystem: `(device, inode)`.
pub type InodeKey = (u64, u64);

/// Process-local map from inode to the canonical SHA1 blob path that owns
/// it. Lives for one process run.
#[derive(Debug, Default)]
pub struct InodeIndex {
    by_inode: HashMap<InodeKey, PathBuf>,
}

impl InodeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_inode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_inode.is_empty()
    }

    /// Inserts a freshly produced SHA1 blob's inode. Must be called on every
    /// new SHA1 blob.
    pub fn register(&mut self, blob_path: &Path) -> std::io::Result<()> {
        let key = inode_key(blob_path)?;
        self.by_inode.insert(key, blob_path.to_path_buf());
        Ok(())
    }

    /// O(1) lookup of the canonical blob path owning a given inode.
    pub fn lookup_by_inode(&self, key: InodeKey) -> Option<&Path> {
        self.by_inode.get(&key).map(PathBuf::as_path)
    }
}

/// Returns the `(device, inode)` identity of a file already on disk.
pub fn inode_key(path: &Path) -> std::io::Result<InodeKey> {
    let meta = fs::metadata(path)?;
    Ok((meta.dev(), meta.ino()))
}

/// Recursively walks `<backup_root>/.data/sha1`, recording inode -> path for
/// every regular file. If `.data/sha1` doesn't exist yet, the index is empty.
pub fn build_inode_index(backup_root: &Path) -> std::io::Result<InodeIndex> {
    let mut index = InodeIndex::new();
    let sha1_root = backup_root.join(REPOSITORY_DIRNAME).join("sha1");
    if !sha1_root.exists() {
        return Ok(index);
    }

    for entry in walkdir::WalkDir::new(&sha1_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        index.register(entry.path())?;
    }

    Ok(index)
}

/// Repository-relative path for a SHA1-keyed blob.
pub fn sha1_blob_path(backup_root: &Path, tag: &ChecksumTag) -> PathBuf {
    debug_assert!(tag.is_sha1());
    backup_root.join(REPOSITORY_DIRNAME).join(tag.hash_path())
}

/// Repository-relative path for an ETag-keyed alias.
pub fn etag_blob_path(backup_root: &Path, tag: &ChecksumTag) -> PathBuf {
    debug_assert!(!tag.is_sha1());
    backup_root.join(REPOSITORY_DIRNAME).join(tag.hash_path())
}

/// Path for the `.downloading` sidecar of a not-yet-published blob.
pub fn downloading_path(final_path: &Path) -> PathBuf {
    // `with_extension` on a path whose final component is already a bare
    // hex string (no dot) simply appends ".downloading".
    final_path.with_extension("downloading")
}

pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Publishes a `.downloading` sidecar as the canonical blob via an atomic
/// rename. Readers of the repository must never observe a partial blob
/// under its canonical name.
pub fn publish(downloading: &Path, final_path: &Path) -> std::io::Result<()> {
    ensure_parent_dir(final_path)?;
    fs::rename(downloading, final_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_writable_creates_root_and_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("fresh_root");
        assert!(!root.exists());
        ensure_writable(&root).unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn ensure_writable_rejects_readonly_root() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("readonly_root");
        fs::create_dir_all(&root).unwrap();
        fs::set_permissions(&root, fs::Permissions::from_mode(0o555)).unwrap();

        let result = ensure_writable(&root);

        fs::set_permissions(&root, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn inode_index_empty_when_sha1_dir_missing() {
        let dir = tempfile::tempdir().unwrap();
        let index = build_inode_index(dir.path()).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn inode_index_finds_blobs_and_links_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let blob = dir.path().join(".data/sha1/ba/8607abc");
        ensure_parent_dir(&blob).unwrap();
        fs::write(&blob, b"content").unwrap();

        let index = build_inode_index(dir.path()).unwrap();
        assert_eq!(index.len(), 1);

        let key = inode_key(&blob).unwrap();
        assert_eq!(index.lookup_by_inode(key), Some(blob.as_path()));
    }

    #[test]
    fn publish_moves_downloading_sidecar_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let downloading = dir.path().join(".data/sha1/ba/8607abc.downloading");
        ensure_parent_dir(&downloading).unwrap();
        fs::write(&downloading, b"content").unwrap();

        let final_path = dir.path().join(".data/sha1/ba/8607abc");
        publish(&downloading, &final_path).unwrap();

        assert!(!downloading.exists());
        assert!(final_path.exists());
    }

    #[test]
    fn sha1_and_etag_blob_paths_shard_correctly() {
        let dir = tempfile::tempdir().unwrap();
        let tag = ChecksumTag::sha1("ba8607f049f59aeadcff2adb9fae48d0cf16b4ad");
        let path = sha1_blob_path(dir.path(), &tag);
        assert_eq!(
            path,
            dir.path().join(".data/sha1/ba/8607f049f59aeadcff2adb9fae48d0cf16b4ad")
        );

        let etag = ChecksumTag::etag("dd0a2a1748da571835f70c95340aa6a7-2");
        let path = etag_blob_path(dir.path(), &etag);
        assert_eq!(
            path,
            dir.path().join(".data/etag/dd/0a2a1748da571835f70c95340aa6a7-2")
        );
    }
}
