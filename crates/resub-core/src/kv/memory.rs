//! In-memory store for tests and ephemeral sessions.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::{entry_size, KvError, KvStore};

#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, Value>>,
    quota: Option<u64>,
    fail_writes: AtomicBool,
    write_count: AtomicUsize,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: u64) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    /// Make subsequent writes fail with `Unavailable` (simulates a revoked host API).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Number of successful `set` batches so far.
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::Relaxed)
    }

    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, KvError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, entries: Vec<(String, Value)>) -> Result<(), KvError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(KvError::Unavailable("writes disabled".to_string()));
        }
        let mut map = self.entries.write().await;
        if let Some(quota) = self.quota {
            let used: u64 = map.iter().map(|(k, v)| entry_size(k, v)).sum();
            let mut after = used;
            for (k, v) in &entries {
                if let Some(old) = map.get(k) {
                    after = after.saturating_sub(entry_size(k, old));
                }
                after += entry_size(k, v);
            }
            if after > quota {
                return Err(KvError::QuotaExceeded {
                    needed: after.saturating_sub(used),
                    available: quota.saturating_sub(used),
                });
            }
        }
        for (k, v) in entries {
            map.insert(k, v);
        }
        self.write_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<(), KvError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(KvError::Unavailable("writes disabled".to_string()));
        }
        let mut map = self.entries.write().await;
        for k in keys {
            map.remove(k);
        }
        Ok(())
    }

    async fn bytes_in_use(&self) -> Result<u64, KvError> {
        let map = self.entries.read().await;
        Ok(map.iter().map(|(k, v)| entry_size(k, v)).sum())
    }

    fn quota_bytes(&self) -> Option<u64> {
        self.quota
    }
}
