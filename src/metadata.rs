//! # Metadata Source (C1)
//!
//! Yields the stream of logical file records for one `(storage_id,
//! path_prefix)` mapping out of Nextcloud's `oc_filecache` table. The trait
//! is a callback-based "push" stream rather than an `Iterator`, which lets
//! [`PostgresMetadataSource`] drive a server-side cursor (a bound portal,
//! fetched in bounded batches) without tying the trait to the lifetime of an
//! in-flight transaction.

use crate::error::MetadataError;
use crate::hash::ChecksumTag;
use postgres::{Client, NoTls};

/// One row from `oc_filecache`, filtered to a single mapping's scope.
///
/// `(storage_id, path)` is unique within one pull; `path` is suffix-relative
/// and gets appended to the snapshot user root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalFile {
    pub file_id: i64,
    pub storage_id: i64,
    pub path: String,
    pub declared_checksum: Option<ChecksumTag>,
    pub size: u64,
}

/// Batch size for the server-side portal fetch loop. Chosen to bound memory
/// while avoiding one network round-trip per row.
const FETCH_BATCH_SIZE: i32 = 2_000;

/// Source of [`LogicalFile`] records for a single `(storage_id, path_prefix)`
/// scope, filtered by excluded mimetype ids.
///
/// `sink` is invoked once per matching row, in whatever order the store
/// produces them — the engine must not rely on ordering.
pub trait MetadataSource {
    fn stream(
        &mut self,
        storage_id: i64,
        path_prefix: &str,
        excluded_mimetype_ids: &[i64],
        sink: &mut dyn FnMut(LogicalFile) -> Result<(), MetadataError>,
    ) -> Result<(), MetadataError>;
}

/// Blocking PostgreSQL-backed [`MetadataSource`], built on the `postgres`
/// crate. Streams rows via a bound portal fetched in batches of
/// [`FETCH_BATCH_SIZE`] rather than materializing the whole result set,
/// since a single mapping's subtree can be very large.
pub struct PostgresMetadataSource {
    client: Client,
}

impl PostgresMetadataSource {
    /// Connects to `dsn` (a standard `postgresql://...` connection string)
    /// and sets the session's default schema via `SET search_path`.
    pub fn connect(dsn: &str, schema: &str) -> Result<Self, MetadataError> {
        let mut client = Client::connect(dsn, NoTls).map_err(MetadataError::Connect)?;
        client
            .batch_execute(&format!("SET search_path TO {schema}"))
            .map_err(MetadataError::Query)?;
        Ok(Self { client })
    }
}

impl MetadataSource for PostgresMetadataSource {
    fn stream(
        &mut self,
        storage_id: i64,
        path_prefix: &str,
        excluded_mimetype_ids: &[i64],
        sink: &mut dyn FnMut(LogicalFile) -> Result<(), MetadataError>,
    ) -> Result<(), MetadataError> {
        let search_path = format!("{path_prefix}%");
        let mut txn = self.client.transaction().map_err(MetadataError::Query)?;
        let portal = txn
            .bind(
                "SELECT fileid, storage, path, checksum, size \
                 FROM oc_filecache \
                 WHERE storage = $1 \
                   AND path ILIKE $2 \
                   AND NOT (mimetype = ANY($3))",
                &[&storage_id, &search_path, &excluded_mimetype_ids],
            )
            .map_err(MetadataError::Query)?;

        loop {
            let rows = txn
                .query_portal(&portal, FETCH_BATCH_SIZE)
                .map_err(MetadataError::Query)?;
            let fetched = rows.len();

            for row in rows {
                let fileid: i64 = row.get(0);
                let storage: i64 = row.get(1);
                let path: String = row.get(2);
                let checksum: Option<String> = row.get(3);
                let size: i64 = row.get(4);

                sink(LogicalFile {
                    file_id: fileid,
                    storage_id: storage,
                    path,
                    declared_checksum: checksum.as_deref().and_then(ChecksumTag::parse),
                    size: size.max(0) as u64,
                })?;
            }

            if (fetched as i32) < FETCH_BATCH_SIZE {
                break;
            }
        }

        txn.commit().map_err(MetadataError::Query)?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeMetadataSource;
    use super::*;

    #[test]
    fn fake_filters_by_storage_and_prefix_case_insensitively() {
        let mut source = FakeMetadataSource {
            files: vec![
                LogicalFile {
                    file_id: 1,
                    storage_id: 2,
                    path: "Files/a/b.txt".into(),
                    declared_checksum: None,
                    size: 10,
                },
                LogicalFile {
                    file_id: 2,
                    storage_id: 2,
                    path: "other/b.txt".into(),
                    declared_checksum: None,
                    size: 10,
                },
                LogicalFile {
                    file_id: 3,
                    storage_id: 9,
                    path: "files/c.txt".into(),
                    declared_checksum: None,
                    size: 10,
                },
            ],
        };

        let mut seen = Vec::new();
        source
            .stream(2, "files/", &[], &mut |f| {
                seen.push(f.file_id);
                Ok(())
            })
            .unwrap();

        assert_eq!(seen, vec![1]);
    }
}
