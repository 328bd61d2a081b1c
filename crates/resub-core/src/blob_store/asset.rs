use super::{codec, BlobError, ChunkedBlobStore, Usage};

const PREFIX: &str = "asset_";

/// Package files stored under `asset_{fileName}`.
pub struct AssetStore {
    blobs: ChunkedBlobStore,
}

impl AssetStore {
    pub fn new(blobs: ChunkedBlobStore) -> Self {
        Self { blobs }
    }

    pub fn key_for(file_name: &str) -> String {
        format!("{}{}", PREFIX, file_name)
    }

    pub fn blobs(&self) -> &ChunkedBlobStore {
        &self.blobs
    }

    pub async fn put(&self, file_name: &str, data: &[u8]) -> Result<(), BlobError> {
        self.blobs.put(&Self::key_for(file_name), data).await
    }

    pub async fn get(&self, file_name: &str) -> Result<Vec<u8>, BlobError> {
        self.blobs.get(&Self::key_for(file_name)).await
    }

    pub async fn remove(&self, file_name: &str) -> Result<(), BlobError> {
        self.blobs.remove(&Self::key_for(file_name)).await
    }

    pub async fn exists(&self, file_name: &str) -> Result<bool, BlobError> {
        self.blobs.exists(&Self::key_for(file_name)).await
    }

    /// Stored file as a data URL, whatever layout it was written in.
    pub async fn data_url(&self, file_name: &str) -> Result<String, BlobError> {
        let bytes = self.get(file_name).await?;
        Ok(codec::encode_data_url(codec::mime_for(file_name), &bytes))
    }

    pub async fn usage(&self) -> Result<Usage, BlobError> {
        self.blobs.usage().await
    }
}
