//! Process-wide persistent key/value state.
//!
//! Values are JSON, mirroring an extension's local storage area. Every
//! mutation is committed before the call returns. Stores may carry a byte
//! quota; writes that would exceed it fail without side effects.

mod memory;
mod sqlite;

pub use memory::MemoryKvStore;
pub use sqlite::SqliteKvStore;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("storage quota exceeded: write needs {needed} bytes, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("sqlite: {0}")]
    Sqlite(#[from] sqlx::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Async key/value store with quota accounting.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, KvError>;

    /// Fetch several keys; missing keys are absent from the map.
    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Value>, KvError> {
        let mut out = HashMap::with_capacity(keys.len());
        for k in keys {
            if let Some(v) = self.get(k).await? {
                out.insert(k.clone(), v);
            }
        }
        Ok(out)
    }

    /// Write all entries or none of them.
    async fn set(&self, entries: Vec<(String, Value)>) -> Result<(), KvError>;

    /// Remove keys; missing keys are ignored.
    async fn remove(&self, keys: &[String]) -> Result<(), KvError>;

    /// Bytes currently used (keys plus serialized values).
    async fn bytes_in_use(&self) -> Result<u64, KvError>;

    /// Byte quota of this store, if it has one.
    fn quota_bytes(&self) -> Option<u64>;
}

/// Accounted size of one entry.
pub fn entry_size(key: &str, value: &Value) -> u64 {
    (key.len() + value.to_string().len()) as u64
}

/// Read a typed value; `None` when the key is missing.
pub async fn get_json<T, S>(store: &S, key: &str) -> Result<Option<T>, KvError>
where
    T: serde::de::DeserializeOwned,
    S: KvStore + ?Sized,
{
    match store.get(key).await? {
        Some(v) => Ok(Some(serde_json::from_value(v)?)),
        None => Ok(None),
    }
}

/// Write a typed value under `key`.
pub async fn set_json<T, S>(store: &S, key: &str, value: &T) -> Result<(), KvError>
where
    T: serde::Serialize,
    S: KvStore + ?Sized,
{
    let v = serde_json::to_value(value)?;
    store.set(vec![(key.to_string(), v)]).await
}
