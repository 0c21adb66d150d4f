//! # Backup Engine (C5)
//!
//! The per-file decision algorithm: for each logical file, decide whether to
//! reuse an existing blob, reuse a provisional ETag alias, or download fresh
//! content — then hardlink the snapshot path to whichever blob ends up
//! canonical. This is the core of the whole system; every other module
//! exists to support it.

use crate::config::MappingConfig;
use crate::error::Error;
use crate::hash::{compute_sha1, ChecksumTag, ObjectKey};
use crate::metadata::{LogicalFile, MetadataSource};
use crate::metrics::{ops, Metrics};
use crate::object_store::ObjectStore;
use crate::repository::{self, InodeIndex};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Runs `backup()` for every mapping, in config order.
///
/// `snapshot_token` is computed once by the caller and reused across every
/// mapping, so one invocation produces exactly one snapshot date folder.
pub fn backup(
    mappings: &[MappingConfig],
    metadata: &mut dyn MetadataSource,
    store: &dyn ObjectStore,
    excluded_mimetype_ids: &[i64],
    snapshot_token: &str,
    metrics: &mut Metrics,
) -> Result<(), Error> {
    for mapping in mappings {
        backup_mapping(
            mapping,
            metadata,
            store,
            excluded_mimetype_ids,
            snapshot_token,
            metrics,
        )?;
    }
    Ok(())
}

fn backup_mapping(
    mapping: &MappingConfig,
    metadata: &mut dyn MetadataSource,
    store: &dyn ObjectStore,
    excluded_mimetype_ids: &[i64],
    snapshot_token: &str,
    metrics: &mut Metrics,
) -> Result<(), Error> {
    repository::ensure_writable(&mapping.backup_root_path)?;
    let mut inode_index = repository::build_inode_index(&mapping.backup_root_path)?;

    metadata
        .stream(
            mapping.storage_id,
            &mapping.nextcloud_path,
            excluded_mimetype_ids,
            &mut |lf| {
                let file_id = lf.file_id;
                let path = lf.path.clone();
                // `backup_file` itself needs `&mut Metrics` for its own
                // sub-operation timings, so it can't also be the closure
                // handed to `metrics.time` — that would borrow `metrics`
                // twice at once. Time it by hand instead.
                let start = std::time::Instant::now();
                let outcome = backup_file(&lf, mapping, store, &mut inode_index, snapshot_token, metrics);
                metrics.record(ops::BACKUP_FILE, start.elapsed());
                if let Err(err) = outcome {
                    warn!(
                        storage_id = mapping.storage_id,
                        file_id,
                        path = %path,
                        error = %err,
                        "skipping file"
                    );
                }
                Ok(())
            },
        )
        .map_err(Error::from)?;

    Ok(())
}

/// Applies the per-file algorithm to one [`LogicalFile`].
///
/// Per-file errors (missing object, transport failure, local filesystem
/// error) are returned as `anyhow::Error` rather than propagated through
/// [`Error`] — the caller logs and skips, never aborting the run.
fn backup_file(
    lf: &LogicalFile,
    mapping: &MappingConfig,
    store: &dyn ObjectStore,
    inode_index: &mut InodeIndex,
    snapshot_token: &str,
    metrics: &mut Metrics,
) -> anyhow::Result<()> {
    let snap = mapping
        .backup_root_path
        .join(repository::SNAPSHOT_DIRNAME)
        .join(snapshot_token)
        .join(&mapping.user_name)
        .join(&lf.path);
    let key = ObjectKey::new(&mapping.bucket, lf.file_id);

    // 1. Empty-file placeholder: a fresh inode, never a hardlink, so that
    // hundreds of thousands of empty files don't collide on one inode's
    // hardlink ceiling.
    if lf.size == 0 {
        repository::ensure_parent_dir(&snap)?;
        fs::File::create(&snap)?;
        return Ok(());
    }

    // 2. Dispatch on declared checksum.
    let effective_sha1_repo = match lf.declared_checksum.as_ref().filter(|t| t.is_sha1()) {
        Some(declared) => sha1_branch(declared, &key, mapping, store, inode_index, metrics)?,
        None => etag_branch(&key, mapping, store, inode_index, metrics)?,
    };

    // LINK.
    if !snap.exists() {
        repository::ensure_parent_dir(&snap)?;
        fs::hard_link(&effective_sha1_repo, &snap)?;
    }

    Ok(())
}

/// SHA1 branch: the metadata store already has a usable checksum, so the
/// repository lookup can be tried before ever touching the object store.
fn sha1_branch(
    declared: &ChecksumTag,
    key: &ObjectKey,
    mapping: &MappingConfig,
    store: &dyn ObjectStore,
    inode_index: &mut InodeIndex,
    metrics: &mut Metrics,
) -> anyhow::Result<PathBuf> {
    let mut repo = repository::sha1_blob_path(&mapping.backup_root_path, declared);

    if repo.exists() {
        return Ok(repo);
    }

    if !metrics.time(ops::OBJECT_EXISTS, || store.exists(key))? {
        anyhow::bail!("object {key} missing in store (declared {declared})");
    }

    let downloading = repository::downloading_path(&repo);
    repository::ensure_parent_dir(&downloading)?;
    metrics.time(ops::OBJECT_DOWNLOAD, || store.download(key, &downloading))?;

    let actual = metrics.time(ops::COMPUTE_SHA1, || compute_sha1(&downloading))?;
    if !actual.value().eq_ignore_ascii_case(declared.value()) {
        warn!(
            declared = %declared,
            actual = %actual,
            "checksum mismatch: content hash wins"
        );
        repo = repository::sha1_blob_path(&mapping.backup_root_path, &actual);
        repository::ensure_parent_dir(&repo)?;
    }

    repository::publish(&downloading, &repo)?;
    inode_index.register(&repo)?;

    Ok(repo)
}

/// ETag branch: no usable SHA1 is known yet, so the object's opaque ETag is
/// used as a provisional repository key until the content is actually
/// hashed.
fn etag_branch(
    key: &ObjectKey,
    mapping: &MappingConfig,
    store: &dyn ObjectStore,
    inode_index: &mut InodeIndex,
    metrics: &mut Metrics,
) -> anyhow::Result<PathBuf> {
    if !metrics.time(ops::OBJECT_EXISTS, || store.exists(key))? {
        anyhow::bail!("object {key} missing in store (no usable declared checksum)");
    }

    let etag = metrics.time(ops::OBJECT_ETAG, || store.etag(key))?;
    let etag_tag = ChecksumTag::etag(etag);
    let etag_repo = repository::etag_blob_path(&mapping.backup_root_path, &etag_tag);

    if !etag_repo.exists() {
        etag_branch_case_a(key, &etag_repo, mapping, store, inode_index, metrics)
    } else {
        etag_branch_case_b(&etag_repo, mapping, inode_index)
    }
}

/// Case A: this ETag has never been seen before. Downloads the content once,
/// then either discovers it's a duplicate of an already-known SHA1 blob, or
/// establishes both the SHA1 and ETag paths as hardlinked aliases.
fn etag_branch_case_a(
    key: &ObjectKey,
    etag_repo: &Path,
    mapping: &MappingConfig,
    store: &dyn ObjectStore,
    inode_index: &mut InodeIndex,
    metrics: &mut Metrics,
) -> anyhow::Result<PathBuf> {
    let downloading = repository::downloading_path(etag_repo);
    repository::ensure_parent_dir(&downloading)?;
    metrics.time(ops::OBJECT_DOWNLOAD, || store.download(key, &downloading))?;

    let sha1_tag = metrics.time(ops::COMPUTE_SHA1, || compute_sha1(&downloading))?;
    let sha1_repo = repository::sha1_blob_path(&mapping.backup_root_path, &sha1_tag);

    if sha1_repo.exists() {
        fs::remove_file(&downloading)?;
        repository::ensure_parent_dir(etag_repo)?;
        fs::hard_link(&sha1_repo, etag_repo)?;
    } else {
        repository::publish(&downloading, etag_repo)?;
        repository::ensure_parent_dir(&sha1_repo)?;
        fs::hard_link(etag_repo, &sha1_repo)?;
        inode_index.register(&sha1_repo)?;
    }

    Ok(sha1_repo)
}

/// Case B: this ETag alias already exists on disk. Usually its SHA1 sibling
/// is still findable through the inode index; if not, self-heal by
/// rehashing the ETag blob directly.
fn etag_branch_case_b(
    etag_repo: &Path,
    mapping: &MappingConfig,
    inode_index: &mut InodeIndex,
) -> anyhow::Result<PathBuf> {
    let inode = repository::inode_key(etag_repo)?;

    if let Some(found) = inode_index.lookup_by_inode(inode) {
        if found.exists() {
            return Ok(found.to_path_buf());
        }
    }

    // Self-heal: the ETag blob is orphaned, or its SHA1 sibling was lost.
    let sha1_tag = compute_sha1(etag_repo)?;
    let sha1_repo = repository::sha1_blob_path(&mapping.backup_root_path, &sha1_tag);

    if sha1_repo.exists() {
        warn!(etag_repo = %etag_repo.display(), "rebinding orphaned ETag alias to canonical SHA1 blob");
        fs::remove_file(etag_repo)?;
        fs::hard_link(&sha1_repo, etag_repo)?;
    } else {
        warn!(etag_repo = %etag_repo.display(), "promoting ETag blob to canonical SHA1 blob");
        repository::ensure_parent_dir(&sha1_repo)?;
        fs::hard_link(etag_repo, &sha1_repo)?;
        inode_index.register(&sha1_repo)?;
    }

    Ok(sha1_repo)
}
