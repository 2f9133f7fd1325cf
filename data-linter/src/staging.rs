//! Durable intermediate state for split-work / merge-results runs.
//!
//! Layout under `<log-base-path>/data_linter_temporary_fs/`:
//!
//! ```text
//! configs/<shard-index>/config.yml    work shards
//! status/<basename>-<uuid>.json       status records
//! logs/<step>-<uuid>.log              captured worker logs
//! ```
//!
//! Every key is written once. Shards are keyed by index and status records
//! and log fragments by a random suffix, so concurrent workers never collide.

use std::marker::PhantomData;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::partitioner::WorkShard;
use crate::runner::StatusRecord;
use crate::storage::{basename, join, Storage};

pub const STAGING_DIR: &str = "data_linter_temporary_fs";
pub const MAIN_LOG_DIR: &str = "data-linter-main-logs";

/// Root of the staging area for a log base path.
pub fn staging_root(log_base_path: &str) -> String {
    join(log_base_path, STAGING_DIR)
}

/// Merged run log location for a timestamp.
pub fn main_log_path(log_base_path: &str, timestamp: i64) -> String {
    join(
        log_base_path,
        &format!("{MAIN_LOG_DIR}/data-linter-{timestamp}.log"),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Yaml,
}

impl Encoding {
    fn encode<T: Serialize>(self, value: &T) -> Result<Bytes> {
        let text = match self {
            Self::Json => serde_json::to_string_pretty(value)?,
            Self::Yaml => serde_yaml::to_string(value)?,
        };
        Ok(Bytes::from(text))
    }

    fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        Ok(match self {
            Self::Json => serde_json::from_slice(bytes)?,
            Self::Yaml => serde_yaml::from_slice(bytes)?,
        })
    }
}

/// A typed collection of objects under one prefix.
#[derive(Debug)]
pub struct KeyedStore<'a, T> {
    storage: &'a dyn Storage,
    prefix: String,
    encoding: Encoding,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: Serialize + DeserializeOwned> KeyedStore<'a, T> {
    pub fn new(storage: &'a dyn Storage, prefix: String, encoding: Encoding) -> Self {
        Self {
            storage,
            prefix,
            encoding,
            _marker: PhantomData,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn location(&self, key: &str) -> String {
        join(&self.prefix, key)
    }

    pub async fn put(&self, key: &str, value: &T) -> Result<String> {
        let location = self.location(key);
        self.storage
            .write(&location, self.encoding.encode(value)?)
            .await?;
        debug!(location = %location, "Staged object");
        Ok(location)
    }

    pub async fn get(&self, key: &str) -> Result<T> {
        let bytes = self.storage.read_all(&self.location(key)).await?;
        self.encoding.decode(&bytes)
    }

    pub async fn contains(&self, key: &str) -> Result<bool> {
        self.storage.exists(&self.location(key)).await
    }

    /// Every staged location, sorted.
    pub async fn locations(&self) -> Result<Vec<String>> {
        self.storage.list(&self.prefix).await
    }

    /// Loads every staged object in key order.
    pub async fn load_all(&self) -> Result<Vec<T>> {
        let mut values = Vec::new();
        for location in self.locations().await? {
            let bytes = self.storage.read_all(&location).await?;
            values.push(self.encoding.decode(&bytes)?);
        }
        Ok(values)
    }

    pub async fn clear(&self) -> Result<usize> {
        self.storage.delete_prefix(&self.prefix).await
    }
}

/// Staging area of one run.
#[derive(Debug, Clone, Copy)]
pub struct Staging<'a> {
    storage: &'a dyn Storage,
    log_base_path: &'a str,
}

impl<'a> Staging<'a> {
    pub fn new(storage: &'a dyn Storage, log_base_path: &'a str) -> Self {
        Self {
            storage,
            log_base_path,
        }
    }

    pub fn root(&self) -> String {
        staging_root(self.log_base_path)
    }

    pub fn shards(&self) -> KeyedStore<'a, WorkShard> {
        KeyedStore::new(self.storage, join(&self.root(), "configs"), Encoding::Yaml)
    }

    pub fn statuses(&self) -> KeyedStore<'a, StatusRecord> {
        KeyedStore::new(self.storage, join(&self.root(), "status"), Encoding::Json)
    }

    pub fn shard_key(index: usize) -> String {
        format!("{index}/config.yml")
    }

    pub async fn write_shard(&self, index: usize, shard: &WorkShard) -> Result<String> {
        self.shards().put(&Self::shard_key(index), shard).await
    }

    /// Reads shard `index`, or `None` when no such shard was written.
    pub async fn read_shard(&self, index: usize) -> Result<Option<WorkShard>> {
        let shards = self.shards();
        let key = Self::shard_key(index);
        if !shards.contains(&key).await? {
            return Ok(None);
        }
        shards.get(&key).await.map(Some)
    }

    /// Writes a status record under a unique key derived from the file's basename.
    pub async fn write_status(&self, record: &StatusRecord) -> Result<String> {
        let key = format!("{}-{}.json", basename(&record.original_path), Uuid::new_v4());
        self.statuses().put(&key, record).await
    }

    pub fn logs_prefix(&self) -> String {
        join(&self.root(), "logs")
    }

    /// Stores a captured log fragment for `step`.
    pub async fn write_log_fragment(&self, step: &str, text: String) -> Result<String> {
        let location = join(
            &self.logs_prefix(),
            &format!("{step}-{}.log", Uuid::new_v4()),
        );
        self.storage.write_text(&location, text).await?;
        Ok(location)
    }

    /// Every log fragment as `(location, text)`, in key order.
    pub async fn read_log_fragments(&self) -> Result<Vec<(String, String)>> {
        let mut fragments = Vec::new();
        for location in self.storage.list(&self.logs_prefix()).await? {
            let bytes = self.storage.read_all(&location).await?;
            fragments.push((location, String::from_utf8_lossy(&bytes).into_owned()));
        }
        Ok(fragments)
    }

    pub async fn clear_logs(&self) -> Result<usize> {
        self.storage.delete_prefix(&self.logs_prefix()).await
    }

    /// Removes the whole staging area.
    pub async fn clear_all(&self) -> Result<usize> {
        self.storage.delete_prefix(&self.root()).await
    }
}
