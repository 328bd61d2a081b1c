//! Binary payload storage over a quota-limited JSON key/value store.
//!
//! Small payloads are kept as one data-URL entry. Larger ones are split into
//! base64 chunks with a metadata entry recording the total size and chunk
//! count; reads verify the reassembled length against that size.

mod asset;
pub mod budget;
pub mod codec;
mod error;
pub mod pack;

pub use asset::AssetStore;
pub use error::BlobError;
pub use pack::PackReport;

use crate::config::StorageConfig;
use crate::kv::KvStore;
use serde_json::{json, Value};
use std::sync::Arc;

/// Key naming scheme for chunked values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkLayout {
    /// Metadata under `key`, chunks under `{key}_chunk{i}`. Small payloads are
    /// stored directly as a data URL under `key`.
    #[default]
    Asset,
    /// Metadata under `{key}_meta`, data-URL chunks under `{key}_{i}`. Always chunked.
    Split,
}

impl ChunkLayout {
    fn meta_key(self, key: &str) -> String {
        match self {
            ChunkLayout::Asset => key.to_string(),
            ChunkLayout::Split => format!("{}_meta", key),
        }
    }

    fn chunk_key(self, key: &str, i: u64) -> String {
        match self {
            ChunkLayout::Asset => format!("{}_chunk{}", key, i),
            ChunkLayout::Split => format!("{}_{}", key, i),
        }
    }
}

/// Byte estimate of a payload once base64-encoded, including entry overhead.
pub fn estimated_encoded_size(len: u64) -> u64 {
    (len * 137).div_ceil(100)
}

/// Quota usage of the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    pub used: u64,
    pub quota: u64,
}

impl Usage {
    pub fn available(&self) -> u64 {
        self.quota.saturating_sub(self.used)
    }
}

pub struct ChunkedBlobStore {
    kv: Arc<dyn KvStore>,
    limits: StorageConfig,
    layout: ChunkLayout,
}

impl ChunkedBlobStore {
    pub fn new(kv: Arc<dyn KvStore>, limits: StorageConfig) -> Self {
        Self::with_layout(kv, limits, ChunkLayout::Asset)
    }

    pub fn with_layout(kv: Arc<dyn KvStore>, limits: StorageConfig, layout: ChunkLayout) -> Self {
        Self { kv, limits, layout }
    }

    pub fn limits(&self) -> &StorageConfig {
        &self.limits
    }

    pub fn layout(&self) -> ChunkLayout {
        self.layout
    }

    /// Current usage; the store's own quota wins over the configured one.
    pub async fn usage(&self) -> Result<Usage, BlobError> {
        let used = self.kv.bytes_in_use().await?;
        let quota = self.kv.quota_bytes().unwrap_or(self.limits.quota_bytes);
        Ok(Usage { used, quota })
    }

    /// Store `data` under `key`, replacing any previous value.
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<(), BlobError> {
        let needed = estimated_encoded_size(data.len() as u64);
        let available = self.usage().await?.available();
        if needed > available {
            tracing::warn!(key, needed, available, "blob put rejected by quota");
            return Err(BlobError::QuotaExceeded { needed, available });
        }

        let stale = self.stored_chunk_count(key).await;

        let direct = self.layout == ChunkLayout::Asset
            && data.len() as u64 <= self.limits.direct_threshold_bytes;
        let chunks_written = if direct {
            let url = codec::encode_data_url(codec::mime_for(key), data);
            self.kv.set(vec![(key.to_string(), Value::String(url))]).await?;
            0
        } else {
            match self.write_chunks(key, data).await {
                Ok(n) => n,
                Err(e) => {
                    // Chunks may already overwrite the previous value; drop it all.
                    if let Err(cleanup) = self.remove(key).await {
                        tracing::warn!(key, error = %cleanup, "cleanup after failed put");
                    }
                    return Err(e);
                }
            }
        };

        if stale > chunks_written {
            let keys: Vec<String> = (chunks_written..stale)
                .map(|i| self.layout.chunk_key(key, i))
                .collect();
            self.kv.remove(&keys).await?;
        }
        tracing::debug!(key, size = data.len(), chunks = chunks_written, "blob stored");
        Ok(())
    }

    /// Writes chunks first and metadata last so a reader never sees metadata
    /// that points at chunks not yet written.
    async fn write_chunks(&self, key: &str, data: &[u8]) -> Result<u64, BlobError> {
        let chunk_size = self.limits.chunk_size_bytes.max(1) as usize;
        let mut count = 0u64;
        for (i, chunk) in data.chunks(chunk_size).enumerate() {
            let encoded = match self.layout {
                ChunkLayout::Asset => codec::encode_chunk(chunk),
                ChunkLayout::Split => codec::encode_data_url("application/octet-stream", chunk),
            };
            self.kv
                .set(vec![(self.layout.chunk_key(key, i as u64), Value::String(encoded))])
                .await?;
            count += 1;
        }
        let meta = match self.layout {
            ChunkLayout::Asset => json!({ "type": "arraybuffer", "size": data.len(), "chunks": count }),
            ChunkLayout::Split => json!({ "size": data.len(), "chunks": count }),
        };
        self.kv.set(vec![(self.layout.meta_key(key), meta)]).await?;
        Ok(count)
    }

    /// Number of chunks the current value under `key` references; 0 when the
    /// value is direct, missing or unreadable.
    async fn stored_chunk_count(&self, key: &str) -> u64 {
        match self.kv.get(&self.layout.meta_key(key)).await {
            Ok(Some(meta)) => meta.get("chunks").and_then(Value::as_u64).unwrap_or(0),
            _ => 0,
        }
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let Some(value) = self.kv.get(&self.layout.meta_key(key)).await? else {
            return Err(BlobError::NotFound(key.to_string()));
        };
        match value {
            Value::String(s) if self.layout == ChunkLayout::Asset => {
                codec::decode_payload(&s).map_err(|e| BlobError::corrupt(key, e))
            }
            Value::Object(_) => self.read_chunks(key, &value).await,
            _ => Err(BlobError::corrupt(key, "unrecognised value format")),
        }
    }

    async fn read_chunks(&self, key: &str, meta: &Value) -> Result<Vec<u8>, BlobError> {
        if self.layout == ChunkLayout::Asset
            && meta.get("type").and_then(Value::as_str) != Some("arraybuffer")
        {
            return Err(BlobError::corrupt(key, "metadata type is not arraybuffer"));
        }
        let size = meta
            .get("size")
            .and_then(Value::as_u64)
            .ok_or_else(|| BlobError::corrupt(key, "metadata missing size"))?;
        let chunks = meta
            .get("chunks")
            .and_then(Value::as_u64)
            .ok_or_else(|| BlobError::corrupt(key, "metadata missing chunk count"))?;

        let keys: Vec<String> = (0..chunks).map(|i| self.layout.chunk_key(key, i)).collect();
        let mut found = self.kv.get_many(&keys).await?;
        let mut out = Vec::with_capacity(size as usize);
        for (i, k) in keys.iter().enumerate() {
            let encoded = match found.remove(k) {
                Some(Value::String(s)) => s,
                Some(_) => return Err(BlobError::corrupt(key, format!("chunk {} is not a string", i))),
                None => return Err(BlobError::corrupt(key, format!("chunk {} missing", i))),
            };
            let bytes = codec::decode_payload(&encoded)
                .map_err(|e| BlobError::corrupt(key, format!("chunk {}: {}", i, e)))?;
            out.extend_from_slice(&bytes);
        }
        if out.len() as u64 != size {
            return Err(BlobError::corrupt(
                key,
                format!("reassembled {} bytes, metadata says {}", out.len(), size),
            ));
        }
        Ok(out)
    }

    /// Delete metadata and every chunk, including orphans left past the
    /// recorded chunk count by an interrupted write.
    pub async fn remove(&self, key: &str) -> Result<(), BlobError> {
        let recorded = self.stored_chunk_count(key).await;
        let mut keys = vec![self.layout.meta_key(key)];
        keys.extend((0..recorded).map(|i| self.layout.chunk_key(key, i)));

        let mut i = recorded;
        loop {
            let k = self.layout.chunk_key(key, i);
            if self.kv.get(&k).await?.is_none() {
                break;
            }
            keys.push(k);
            i += 1;
        }
        self.kv.remove(&keys).await?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> Result<bool, BlobError> {
        Ok(self.kv.get(&self.layout.meta_key(key)).await?.is_some())
    }
}
