//! Fetching dev-server assets over HTTP.
//!
//! The curl transfer runs on the blocking pool; callers stay async.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GET {url}: {reason}")]
    Transport { url: String, reason: String },
    #[error("GET {url} returned HTTP {code}")]
    Status { url: String, code: u32 },
}

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct CurlFetcher {
    connect_timeout: Duration,
    timeout: Duration,
}

impl Default for CurlFetcher {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            timeout: Duration::from_secs(60),
        }
    }
}

impl CurlFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Blocking GET returning the body of a 2xx response.
pub fn get_blocking(
    url: &str,
    connect_timeout: Duration,
    timeout: Duration,
) -> Result<Vec<u8>, FetchError> {
    let transport = |e: curl::Error| FetchError::Transport {
        url: url.to_string(),
        reason: e.to_string(),
    };
    let mut body = Vec::new();
    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(transport)?;
    easy.follow_location(true).map_err(transport)?;
    easy.connect_timeout(connect_timeout).map_err(transport)?;
    easy.timeout(timeout).map_err(transport)?;
    {
        let mut transfer = easy.transfer();
        transfer
            .write_function(|data| {
                body.extend_from_slice(data);
                Ok(data.len())
            })
            .map_err(transport)?;
        transfer.perform().map_err(transport)?;
    }
    let code = easy.response_code().map_err(transport)?;
    if !(200..300).contains(&code) {
        return Err(FetchError::Status {
            url: url.to_string(),
            code,
        });
    }
    Ok(body)
}

#[async_trait]
impl AssetFetcher for CurlFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let url_owned = url.to_string();
        let (connect, total) = (self.connect_timeout, self.timeout);
        let body = tokio::task::spawn_blocking(move || get_blocking(&url_owned, connect, total))
            .await
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                reason: format!("fetch task failed: {}", e),
            })??;
        tracing::debug!(url, bytes = body.len(), "fetched");
        Ok(body)
    }
}

/// Serves canned bodies by URL; anything else is a 404.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    requests: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, body: &[u8]) {
        self.bodies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), body.to_vec());
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AssetFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.bodies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Status {
                url: url.to_string(),
                code: 404,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_fetcher_serves_and_404s() {
        let f = MemoryFetcher::new();
        f.insert("http://dev/a.js", b"a");
        assert_eq!(f.fetch("http://dev/a.js").await.unwrap(), b"a");
        assert!(matches!(
            f.fetch("http://dev/b.js").await,
            Err(FetchError::Status { code: 404, .. })
        ));
        assert_eq!(f.request_count(), 2);
    }

    #[test]
    fn invalid_url_is_transport_error() {
        let err = get_blocking("http://[::1", Duration::from_secs(1), Duration::from_secs(1));
        assert!(matches!(err, Err(FetchError::Transport { .. })));
    }
}
