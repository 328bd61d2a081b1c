use crate::kv::KvError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("quota exceeded: need ~{needed} bytes, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },
    #[error("corrupt data under {key}: {reason}")]
    CorruptData { key: String, reason: String },
    #[error("no stored value under {0}")]
    NotFound(String),
    #[error("store: {0}")]
    Store(KvError),
}

impl From<KvError> for BlobError {
    fn from(e: KvError) -> Self {
        match e {
            KvError::QuotaExceeded { needed, available } => {
                BlobError::QuotaExceeded { needed, available }
            }
            other => BlobError::Store(other),
        }
    }
}

impl BlobError {
    pub(crate) fn corrupt(key: &str, reason: impl Into<String>) -> Self {
        BlobError::CorruptData {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
