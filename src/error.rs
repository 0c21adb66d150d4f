//! # Error Types
//!
//! Defines a structured error hierarchy for the backup engine using `thiserror`.
//! Each error variant carries enough context for meaningful diagnostics without
//! exposing internal implementation details to the caller.
//!
//! Per-file failures (missing object, checksum mismatch, orphaned ETag blob)
//! never surface through this hierarchy — they are caught at the point of
//! occurrence, logged with `tracing::warn!`, and the affected file is skipped.
//! Only run-fatal conditions (bad config, unreachable metadata store, an
//! unwritable backup root) propagate as [`Error`] and abort the run before
//! processing begins.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type encompassing all run-fatal failure modes.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("metadata source error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    #[error("repository error: {0}")]
    Repository(#[from] RepoError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found (searched: {searched:?})")]
    NotFound { searched: Vec<PathBuf> },

    #[error("failed to parse config: {source}")]
    Parse {
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {message}")]
    Validation { message: String },
}

/// Errors reaching or reading from the metadata store (PostgreSQL).
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("could not connect to metadata store: {0}")]
    Connect(#[source] postgres::Error),

    #[error("query against metadata store failed: {0}")]
    Query(#[source] postgres::Error),
}

/// Errors reaching or reading from the object store (S3). These are always
/// per-file in the engine (caught and turned into a skip-with-warning), but
/// the adapter itself reports them structurally so the engine can tell a
/// "not found" apart from a transport failure.
#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("object {key} does not exist in the store")]
    NotFound { key: String },

    #[error("transport error while handling object {key}: {source}")]
    Transport {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Repository structure and filesystem errors.
#[derive(Error, Debug)]
#[allow(dead_code)]
pub enum RepoError {
    #[error("backup root is not writable: {0}")]
    NotWritable(PathBuf),

    #[error("inconsistent blob at {path}: {message}")]
    Corrupted { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;
