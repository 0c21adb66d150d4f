//! # Object Store Adapter (C2)
//!
//! Existence check, ETag retrieval, and streaming download against the
//! S3-compatible store backing Nextcloud's primary data. No assumption is
//! made about whether an ETag is an MD5 — it is treated as an opaque
//! identifier.
//!
//! [`S3ObjectStore`] is built on `aws-sdk-s3`, which is inherently async.
//! The engine's control flow is synchronous end-to-end — the only
//! concurrency permitted is *internal* to this adapter, e.g. multipart
//! transfer threads for a single object. To square that, the adapter owns a
//! dedicated `tokio` runtime and exposes `exists`/`etag`/`download` as plain
//! blocking methods via `block_on`; from the engine's perspective this is
//! indistinguishable from a blocking network call.

use crate::error::ObjectStoreError;
use crate::hash::ObjectKey;
use aws_sdk_s3::Client;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Existence check, streaming download, and ETag retrieval for a single
/// object key.
pub trait ObjectStore {
    fn exists(&self, key: &ObjectKey) -> Result<bool, ObjectStoreError>;

    /// Writes byte-exact content to `dest_path`, streaming rather than
    /// buffering the whole object in memory.
    fn download(&self, key: &ObjectKey, dest_path: &Path) -> Result<(), ObjectStoreError>;

    /// Returns the provider's opaque entity tag, including any multipart
    /// suffix such as `-2`.
    fn etag(&self, key: &ObjectKey) -> Result<String, ObjectStoreError>;
}

/// Blocking facade over `aws-sdk-s3`.
pub struct S3ObjectStore {
    client: Client,
    runtime: tokio::runtime::Runtime,
}

impl S3ObjectStore {
    /// Builds a client from the standard AWS credential/region chain,
    /// optionally overridden by an explicit endpoint (for S3-compatible
    /// providers that aren't AWS itself).
    pub fn new(endpoint_url: Option<&str>, region: Option<&str>) -> Result<Self, ObjectStoreError> {
        let runtime = tokio::runtime::Runtime::new().map_err(|e| ObjectStoreError::Transport {
            key: String::new(),
            source: e.into(),
        })?;

        let client = runtime.block_on(async {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
            if let Some(region) = region {
                loader = loader.region(aws_sdk_s3::config::Region::new(region.to_string()));
            }
            let config = loader.load().await;

            let mut s3_config = aws_sdk_s3::config::Builder::from(&config);
            if let Some(endpoint) = endpoint_url {
                s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
            }
            Client::from_conf(s3_config.build())
        });

        Ok(Self { client, runtime })
    }
}

impl ObjectStore for S3ObjectStore {
    fn exists(&self, key: &ObjectKey) -> Result<bool, ObjectStoreError> {
        self.runtime.block_on(async {
            match self
                .client
                .head_object()
                .bucket(key.bucket())
                .key(key.key())
                .send()
                .await
            {
                Ok(_) => Ok(true),
                Err(err) => {
                    if is_not_found(&err) {
                        Ok(false)
                    } else {
                        Err(ObjectStoreError::Transport {
                            key: key.to_string(),
                            source: err.into(),
                        })
                    }
                }
            }
        })
    }

    fn etag(&self, key: &ObjectKey) -> Result<String, ObjectStoreError> {
        self.runtime.block_on(async {
            let output = self
                .client
                .head_object()
                .bucket(key.bucket())
                .key(key.key())
                .send()
                .await
                .map_err(|err| {
                    if is_not_found(&err) {
                        ObjectStoreError::NotFound {
                            key: key.to_string(),
                        }
                    } else {
                        ObjectStoreError::Transport {
                            key: key.to_string(),
                            source: err.into(),
                        }
                    }
                })?;

            Ok(output
                .e_tag()
                .unwrap_or_default()
                .trim_matches('"')
                .to_string())
        })
    }

    fn download(&self, key: &ObjectKey, dest_path: &Path) -> Result<(), ObjectStoreError> {
        self.runtime.block_on(async {
            let mut output = self
                .client
                .get_object()
                .bucket(key.bucket())
                .key(key.key())
                .send()
                .await
                .map_err(|err| {
                    if is_not_found(&err) {
                        ObjectStoreError::NotFound {
                            key: key.to_string(),
                        }
                    } else {
                        ObjectStoreError::Transport {
                            key: key.to_string(),
                            source: err.into(),
                        }
                    }
                })?;

            let mut file = File::create(dest_path).map_err(|e| ObjectStoreError::Transport {
                key: key.to_string(),
                source: e.into(),
            })?;

            while let Some(chunk) =
                output
                    .body
                    .next()
                    .await
                    .transpose()
                    .map_err(|e| ObjectStoreError::Transport {
                        key: key.to_string(),
                        source: e.into(),
                    })?
            {
                file.write_all(&chunk).map_err(|e| ObjectStoreError::Transport {
                    key: key.to_string(),
                    source: e.into(),
                })?;
            }

            Ok(())
        })
    }
}

fn is_not_found<E>(err: &aws_sdk_s3::error::SdkError<E>) -> bool
where
    E: std::fmt::Debug,
{
    matches!(
        err,
        aws_sdk_s3::error::SdkError::ServiceError(service_err)
            if service_err.raw().status().as_u16() == 404
    )
}

#[cfg(test)]
pub mod fake {
    //! An in-memory [`ObjectStore`] used by engine tests.
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakeObjectStore {
        pub objects: RefCell<HashMap<String, (Vec<u8>, String)>>,
    }

    impl FakeObjectStore {
        pub fn put(&self, key: &ObjectKey, content: impl Into<Vec<u8>>, etag: impl Into<String>) {
            self.objects
                .borrow_mut()
                .insert(key.to_string(), (content.into(), etag.into()));
        }
    }

    impl ObjectStore for FakeObjectStore {
        fn exists(&self, key: &ObjectKey) -> Result<bool, ObjectStoreError> {
            Ok(self.objects.borrow().contains_key(&key.to_string()))
        }

        fn download(&self, key: &ObjectKey, dest_path: &Path) -> Result<(), ObjectStoreError> {
            let objects = self.objects.borrow();
            let (content, _) = objects
                .get(&key.to_string())
                .ok_or_else(|| ObjectStoreError::NotFound {
                    key: key.to_string(),
                })?;
            std::fs::write(dest_path, content).map_err(|e| ObjectStoreError::Transport {
                key: key.to_string(),
                source: e.into(),
            })
        }

        fn etag(&self, key: &ObjectKey) -> Result<String, ObjectStoreError> {
            let objects = self.objects.borrow();
            let (_, etag) = objects
                .get(&key.to_string())
                .ok_or_else(|| ObjectStoreError::NotFound {
                    key: key.to_string(),
                })?;
            Ok(etag.clone())
        }
    }
}
