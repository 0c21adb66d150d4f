//! # Purge Engine (C6)
//!
//! Inode-based garbage collection. For each distinct `backup_root`,
//! enumerates every inode still referenced by a snapshot file, then sweeps
//! `.data/sha1` and `.data/etag` separately against that same live set — an
//! ETag blob aliases its SHA1 sibling's inode, so one live-inode set
//! correctly covers both passes without double-counting.

use crate::config::MappingConfig;
use crate::metrics::{ops, Metrics};
use crate::repository::{self, InodeKey};
use std::collections::{HashSet, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Bytes freed by sweeping one `.data/<method>` subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepResult {
    pub files_removed: u64,
    pub bytes_freed: u64,
}

/// Report for one `backup_root`'s purge pass. Keeps the two passes separate
/// end to end rather than collapsing them into a single combined total, so
/// a reader can tell how much of the reclaimed space came from deduplicated
/// ETag aliases versus canonical SHA1 blobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PurgeReport {
    pub sha1: SweepResult,
    pub etag: SweepResult,
}

/// Runs `purge()` for every distinct `backup_root` across all mappings. Is
/// read-only with respect to `snapshots/`.
pub fn purge(mappings: &[MappingConfig], metrics: &mut Metrics) -> std::io::Result<Vec<(PathBuf, PurgeReport)>> {
    let mut seen = BTreeSet::new();
    let mut reports = Vec::new();

    for mapping in mappings {
        if !seen.insert(mapping.backup_root_path.clone()) {
            continue;
        }

        let report = metrics.time(ops::PURGE_SWEEP, || purge_root(&mapping.backup_root_path))?;
        info!(
            backup_root = %mapping.backup_root_path.display(),
            sha1_removed = report.sha1.files_removed,
            sha1_bytes = report.sha1.bytes_freed,
            etag_removed = report.etag.files_removed,
            etag_bytes = report.etag.bytes_freed,
            "purge complete"
        );
        reports.push((mapping.backup_root_path.clone(), report));
    }

    Ok(reports)
}

fn purge_root(backup_root: &Path) -> std::io::Result<PurgeReport> {
    let live_inodes = live_inodes(backup_root)?;

    let sha1 = sweep(&backup_root.join(repository::REPOSITORY_DIRNAME).join("sha1"), &live_inodes)?;
    let etag = sweep(&backup_root.join(repository::REPOSITORY_DIRNAME).join("etag"), &live_inodes)?;

    Ok(PurgeReport { sha1, etag })
}

/// Enumerates every inode referenced by a regular file under
/// `backup_root/snapshots`. Empty (never populated, or all snapshots
/// already removed) when no snapshots exist — cold state then unlinks all
/// blobs under the root.
fn live_inodes(backup_root: &Path) -> std::io::Result<HashSet<InodeKey>> {
    let mut live = HashSet::new();
    let snapshots_root = backup_root.join(repository::SNAPSHOT_DIRNAME);
    if !snapshots_root.exists() {
        return Ok(live);
    }

    for entry in walkdir::WalkDir::new(&snapshots_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        live.insert(repository::inode_key(entry.path())?);
    }

    Ok(live)
}

/// Unlinks every regular file under `root` whose inode is not in
/// `live_inodes`, returning the count and bytes freed.
fn sweep(root: &Path, live_inodes: &HashSet<InodeKey>) -> std::io::Result<SweepResult> {
    let mut result = SweepResult::default();
    if !root.exists() {
        return Ok(result);
    }

    for entry in walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let inode = repository::inode_key(path)?;
        if live_inodes.contains(&inode) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if let Err(err) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %err, "failed to remove unreferenced blob");
            continue;
        }

        result.files_removed += 1;
        result.bytes_freed += size;
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ChecksumTag;

    fn mapping(root: &Path) -> MappingConfig {
        MappingConfig {
            storage_id: 2,
            user_name: "alice".to_string(),
            bucket: "bucket".to_string(),
            nextcloud_path: String::new(),
            backup_root_path: root.to_path_buf(),
        }
    }

    #[test]
    fn cold_state_unlinks_all_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let tag = ChecksumTag::sha1("ba8607f049f59aeadcff2adb9fae48d0cf16b4ad");
        let blob = repository::sha1_blob_path(dir.path(), &tag);
        repository::ensure_parent_dir(&blob).unwrap();
        fs::write(&blob, b"content").unwrap();

        let mut metrics = Metrics::new();
        let reports = purge(&[mapping(dir.path())], &mut metrics).unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].1.sha1.files_removed, 1);
        assert!(!blob.exists());
    }

    #[test]
    fn live_blob_survives_and_snapshot_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let tag = ChecksumTag::sha1("ba8607f049f59aeadcff2adb9fae48d0cf16b4ad");
        let blob = repository::sha1_blob_path(dir.path(), &tag);
        repository::ensure_parent_dir(&blob).unwrap();
        fs::write(&blob, b"content").unwrap();

        let snap = dir.path().join("snapshots/250101-0000/alice/a.txt");
        repository::ensure_parent_dir(&snap).unwrap();
        fs::hard_link(&blob, &snap).unwrap();

        let mut metrics = Metrics::new();
        let reports = purge(&[mapping(dir.path())], &mut metrics).unwrap();

        assert_eq!(reports[0].1.sha1.files_removed, 0);
        assert!(blob.exists());
        assert!(snap.exists());
    }

    #[test]
    fn purge_after_snapshot_removal_sweeps_both_passes() {
        let dir = tempfile::tempdir().unwrap();
        let sha1_tag = ChecksumTag::sha1("ba8607f049f59aeadcff2adb9fae48d0cf16b4ad");
        let sha1_blob = repository::sha1_blob_path(dir.path(), &sha1_tag);
        repository::ensure_parent_dir(&sha1_blob).unwrap();
        fs::write(&sha1_blob, b"content").unwrap();

        let etag_tag = ChecksumTag::etag("dd0a2a1748da571835f70c95340aa6a7-2");
        let etag_blob = repository::etag_blob_path(dir.path(), &etag_tag);
        repository::ensure_parent_dir(&etag_blob).unwrap();
        fs::hard_link(&sha1_blob, &etag_blob).unwrap();

        let snap = dir.path().join("snapshots/250101-0000/alice/a.txt");
        repository::ensure_parent_dir(&snap).unwrap();
        fs::hard_link(&sha1_blob, &snap).unwrap();

        fs::remove_dir_all(dir.path().join("snapshots/250101-0000")).unwrap();

        let mut metrics = Metrics::new();
        let reports = purge(&[mapping(dir.path())], &mut metrics).unwrap();

        assert_eq!(reports[0].1.sha1.files_removed, 1);
        assert_eq!(reports[0].1.etag.files_removed, 1);
        assert!(!sha1_blob.exists());
        assert!(!etag_blob.exists());
        assert!(!dir.path().join("snapshots/250101-0000").exists());
    }

    #[test]
    fn distinct_backup_roots_are_each_swept_once() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let mappings = vec![
            mapping(dir_a.path()),
            MappingConfig {
                user_name: "bob".to_string(),
                ..mapping(dir_a.path())
            },
            mapping(dir_b.path()),
        ];

        let mut metrics = Metrics::new();
        let reports = purge(&mappings, &mut metrics).unwrap();
        assert_eq!(reports.len(), 2);
    }
}
