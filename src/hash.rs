//! # Path & Hash Model (C3)
//!
//! Checksum parsing and the derivation of repository-relative paths from a
//! checksum tag. Also defines the two path-like values the engine passes
//! around: [`ObjectKey`] (identifies an object in the store) and
//! [`LocalPath`] (a plain filesystem path). These are kept as distinct types
//! on purpose, so that `exists`/`download`/`etag` can only ever be called
//! through the object-store adapter, not accidentally invoked on a local
//! path.

use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Size of the read buffer for streaming hash computation. Bounded so that
/// hashing a multi-gigabyte blob never requires reading the whole file into
/// memory at once.
const CHUNK_SIZE: usize = 1024 * 1024;

/// A plain local filesystem path. Kept as a type alias purely for call-site
/// readability — it carries no object-store semantics.
pub type LocalPath = PathBuf;

/// Identifies an object in the S3-compatible store: a bucket plus the literal
/// ASCII key `urn:oid:<file_id>` — no URL-encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    bucket: String,
    key: String,
}

impl ObjectKey {
    pub fn new(bucket: &str, file_id: i64) -> Self {
        Self {
            bucket: bucket.trim_end_matches('/').to_string(),
            key: format!("urn:oid:{file_id}"),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// A parsed `"<method>:<value>"` checksum tag, e.g. `SHA1:ba8607...` or
/// `ETAG:dd0a2a...-2`.
///
/// Any tag whose method isn't recognized, or that is empty/absent, is *not*
/// represented by this type at all — callers see that case as `None` from
/// [`ChecksumTag::parse`] and route to the ETag branch of the backup
/// algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumTag {
    method: String,
    value: String,
}

impl ChecksumTag {
    /// Parses `"<method>:<value>"`, lowercasing the method. Returns `None`
    /// for anything that doesn't split on exactly one `:`, is empty, or
    /// isn't `sha1`/`etag`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let (method, value) = raw.split_once(':')?;
        let method = method.to_lowercase();
        if method != "sha1" && method != "etag" {
            return None;
        }
        if value.is_empty() {
            return None;
        }
        Some(Self {
            method,
            value: value.to_string(),
        })
    }

    pub fn sha1(hex: impl Into<String>) -> Self {
        Self {
            method: "sha1".to_string(),
            value: hex.into().to_lowercase(),
        }
    }

    pub fn etag(value: impl Into<String>) -> Self {
        Self {
            method: "etag".to_string(),
            value: value.into(),
        }
    }

    pub fn is_sha1(&self) -> bool {
        self.method == "sha1"
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Renders the literal `"SHA1:..."` / `"ETAG:..."` form used in log
    /// messages and as the effective checksum recorded after a mismatch.
    pub fn display_tag(&self) -> String {
        format!("{}:{}", self.method.to_uppercase(), self.value)
    }

    /// `hash_path(checksum) -> relative path`: `<method>/<hex[0:2]>/<hex[2:]>`.
    /// Defined for any two-character-or-longer value; shorter values
    /// degenerate to a prefix-only directory, which never occurs in practice
    /// for SHA1 (40 hex chars) or real ETags.
    pub fn hash_path(&self) -> PathBuf {
        let split = self.value.char_indices().nth(2).map(|(i, _)| i).unwrap_or(self.value.len());
        let (prefix, rest) = self.value.split_at(split);
        PathBuf::from(&self.method).join(prefix).join(rest)
    }
}

impl std::fmt::Display for ChecksumTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_tag())
    }
}

/// Derives a [`ChecksumTag`] for a SHA1 blob from its *repository-relative*
/// path, i.e. the trailing `<xx>/<rest>` components under `.data/sha1/`. The
/// hex prefix and remainder live near the *end* of the path once the full
/// `backup_root/.data/sha1/xx/rest` path is in hand, not the front of it —
/// take care not to grab the wrong two components.
pub fn sha1_tag_from_blob_path(sha1_blob_path: &Path) -> Option<ChecksumTag> {
    let rest = sha1_blob_path.file_name()?.to_str()?;
    let prefix = sha1_blob_path.parent()?.file_name()?.to_str()?;
    Some(ChecksumTag::sha1(format!("{prefix}{rest}")))
}

/// Computes `"SHA1:" + lowercase_hex(sha1(bytes))` for a file's content,
/// hashing in bounded-size chunks rather than reading the whole file into
/// memory.
pub fn compute_sha1(path: &Path) -> std::io::Result<ChecksumTag> {
    let mut file = File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    let digest = hasher.finalize();
    Ok(ChecksumTag::sha1(hex_encode(&digest)))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to a String never fails");
    }
    out
}
