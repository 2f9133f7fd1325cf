//! Storage access over remote object stores and the local filesystem.
//!
//! Locations are plain strings. `scheme://bucket/key` addresses an object in a
//! registered (or environment-configured) store; anything else is a local
//! path, served through `object_store`'s `LocalFileSystem`.

use std::collections::HashMap;
use std::fmt::Debug;
use std::io::Write;
use std::path::{Component, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::{LinterError, Result};

const LOCAL_STORE_ID: &str = "local";

/// Returns true for URL-style locations other than `file://`.
pub fn is_remote_path(path: &str) -> bool {
    match path.split_once("://") {
        Some((scheme, _)) => !scheme.is_empty() && scheme != "file",
        None => false,
    }
}

/// Joins a relative part onto a base location with exactly one `/`.
pub fn join(base: &str, rel: &str) -> String {
    let rel = rel.trim_start_matches('/');
    if base.is_empty() {
        return rel.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), rel)
}

/// Final path segment of a location.
pub fn basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

/// Gzip-compresses a buffer.
pub fn gzip(data: &[u8]) -> Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    Ok(Bytes::from(encoder.finish()?))
}

/// Storage operations the linter needs.
#[async_trait]
pub trait Storage: Send + Sync + Debug {
    /// Lists every object under `prefix` with its size in bytes, sorted by
    /// path, in the caller's spelling.
    async fn list_sized(&self, prefix: &str) -> Result<Vec<(String, u64)>>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .list_sized(prefix)
            .await?
            .into_iter()
            .map(|(path, _)| path)
            .collect())
    }

    /// Object size in bytes without downloading it.
    async fn head_size(&self, path: &str) -> Result<u64>;

    async fn read_all(&self, path: &str) -> Result<Bytes>;

    async fn write(&self, path: &str, data: Bytes) -> Result<()>;

    async fn copy(&self, src: &str, dst: &str) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Whether `path` lives on remote object storage.
    fn is_remote(&self, path: &str) -> bool {
        is_remote_path(path)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match self.head_size(path).await {
            Ok(_) => Ok(true),
            Err(LinterError::Storage {
                source: object_store::Error::NotFound { .. },
                ..
            }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn write_text(&self, path: &str, text: String) -> Result<()> {
        self.write(path, Bytes::from(text)).await
    }

    /// Copies `src` to `dst`, gzip-compressing on the way when asked.
    async fn archive(&self, src: &str, dst: &str, compress: bool) -> Result<()> {
        if compress {
            let data = self.read_all(src).await?;
            self.write(dst, gzip(&data)?).await
        } else {
            self.copy(src, dst).await
        }
    }

    /// Deletes every object under `prefix`. Returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let paths = self.list(prefix).await?;
        for path in &paths {
            self.delete(path).await?;
        }
        Ok(paths.len())
    }
}

/// Serializes `value` as pretty JSON and writes it.
pub async fn write_json<T: Serialize + ?Sized>(
    storage: &dyn Storage,
    path: &str,
    value: &T,
) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    storage.write_text(path, text).await
}

pub async fn read_json<T: DeserializeOwned>(storage: &dyn Storage, path: &str) -> Result<T> {
    let bytes = storage.read_all(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

struct Resolved {
    store_id: String,
    store: Arc<dyn ObjectStore>,
    key: ObjectPath,
}

/// [`Storage`] backed by `object_store`.
///
/// Stores are looked up by `scheme://bucket`. Tests register in-memory stores
/// with [`ObjectStorage::with_store`]; with the `s3`/`gcs` features enabled an
/// unregistered bucket gets a client configured from the environment.
#[derive(Debug)]
pub struct ObjectStorage {
    stores: RwLock<HashMap<String, Arc<dyn ObjectStore>>>,
    local: Arc<dyn ObjectStore>,
}

impl Default for ObjectStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStorage {
    pub fn new() -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            local: Arc::new(LocalFileSystem::new()),
        }
    }

    /// Registers `store` for every location starting with `root` (e.g. `s3://land`).
    pub fn with_store(self, root: &str, store: Arc<dyn ObjectStore>) -> Self {
        self.register(root, store);
        self
    }

    pub fn register(&self, root: &str, store: Arc<dyn ObjectStore>) {
        // the map stays consistent if a holder panicked, so recover it
        self.stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(root.trim_end_matches('/').to_string(), store);
    }

    fn resolve(&self, location: &str) -> Result<Resolved> {
        if let Some((scheme, rest)) = location.split_once("://") {
            if scheme == "file" {
                return self.resolve_local(rest);
            }
            let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
            let store_id = format!("{scheme}://{bucket}");
            let store = self.store_for(&store_id, scheme, bucket)?;
            return Ok(Resolved {
                store_id,
                store,
                key: ObjectPath::from(key.trim_matches('/')),
            });
        }
        self.resolve_local(location)
    }

    fn resolve_local(&self, path: &str) -> Result<Resolved> {
        let absolute = normalize_local(path)?;
        let key = absolute.to_string_lossy();
        Ok(Resolved {
            store_id: LOCAL_STORE_ID.to_string(),
            store: Arc::clone(&self.local),
            key: ObjectPath::from(key.trim_start_matches('/')),
        })
    }

    fn store_for(&self, store_id: &str, scheme: &str, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        if let Some(store) = self
            .stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(store_id)
            .cloned()
        {
            return Ok(store);
        }

        let store = build_remote_store(store_id, scheme, bucket)?;
        self.register(store_id, Arc::clone(&store));
        Ok(store)
    }
}

#[allow(unused_variables)]
fn build_remote_store(store_id: &str, scheme: &str, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    match scheme {
        #[cfg(feature = "s3")]
        "s3" => {
            let store = object_store::aws::AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .with_retry(object_store::RetryConfig {
                    max_retries: 3,
                    retry_timeout: std::time::Duration::from_secs(30),
                    ..Default::default()
                })
                .build()
                .map_err(|e| LinterError::storage(store_id, e))?;
            debug!(store = %store_id, "Created S3 client from environment");
            Ok(Arc::new(store))
        }
        #[cfg(feature = "gcs")]
        "gs" => {
            let store = object_store::gcp::GoogleCloudStorageBuilder::from_env()
                .with_bucket_name(bucket)
                .build()
                .map_err(|e| LinterError::storage(store_id, e))?;
            debug!(store = %store_id, "Created GCS client from environment");
            Ok(Arc::new(store))
        }
        _ => Err(LinterError::ConfigInvalid(format!(
            "no object store available for '{store_id}'; register one or enable the matching cloud feature"
        ))),
    }
}

/// Absolute, lexically normalized form of a local path.
fn normalize_local(path: &str) -> Result<PathBuf> {
    let path = std::path::Path::new(path);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

#[async_trait]
impl Storage for ObjectStorage {
    #[instrument(skip(self))]
    async fn list_sized(&self, prefix: &str) -> Result<Vec<(String, u64)>> {
        let resolved = self.resolve(prefix)?;
        let key = resolved.key.as_ref().to_string();
        let list_prefix = if key.is_empty() {
            None
        } else {
            Some(&resolved.key)
        };

        let metas: Vec<object_store::ObjectMeta> = match resolved
            .store
            .list(list_prefix)
            .try_collect()
            .await
        {
            Ok(metas) => metas,
            Err(object_store::Error::NotFound { .. }) => Vec::new(),
            Err(e) => return Err(LinterError::storage(prefix, e)),
        };

        let mut paths: Vec<(String, u64)> = metas
            .into_iter()
            .filter_map(|meta| {
                let location = meta.location.as_ref();
                let rel = location.strip_prefix(key.as_str())?.trim_start_matches('/');
                (!rel.is_empty()).then(|| (join(prefix, rel), meta.size))
            })
            .collect();
        paths.sort();
        debug!(prefix = %prefix, count = paths.len(), "Listed objects");
        Ok(paths)
    }

    async fn head_size(&self, path: &str) -> Result<u64> {
        let resolved = self.resolve(path)?;
        let meta = resolved
            .store
            .head(&resolved.key)
            .await
            .map_err(|e| LinterError::storage(path, e))?;
        Ok(meta.size)
    }

    async fn read_all(&self, path: &str) -> Result<Bytes> {
        let resolved = self.resolve(path)?;
        let result = resolved
            .store
            .get(&resolved.key)
            .await
            .map_err(|e| LinterError::storage(path, e))?;
        result.bytes().await.map_err(|e| LinterError::storage(path, e))
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        let resolved = self.resolve(path)?;
        resolved
            .store
            .put(&resolved.key, PutPayload::from(data))
            .await
            .map_err(|e| LinterError::storage(path, e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let from = self.resolve(src)?;
        let to = self.resolve(dst)?;
        if from.store_id == to.store_id {
            from.store
                .copy(&from.key, &to.key)
                .await
                .map_err(|e| LinterError::storage(src, e))
        } else {
            let data = self.read_all(src).await?;
            self.write(dst, data).await
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        resolved
            .store
            .delete(&resolved.key)
            .await
            .map_err(|e| LinterError::storage(path, e))
    }
}
