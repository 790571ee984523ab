//! HTTP client abstraction so providers can be exercised without a network

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::{MapError, Result};

/// Shared async HTTP client for all providers. Building it once avoids TLS
/// and connection pool setup per request.
pub(crate) static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent(concat!("mapstream/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(30))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(16)
        .build()
        .unwrap_or_else(|e| {
            log::warn!("falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        })
});

#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Fetches the full response body of `url`. Non-success statuses are
    /// reported as [`MapError::FetchFailure`].
    async fn get(&self, url: &str) -> Result<Vec<u8>>;
}

/// [`HttpClient`] backed by the shared reqwest client.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReqwestClient;

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        let response = HTTP_CLIENT.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MapError::FetchFailure(format!("HTTP {} for {}", status, url)));
        }
        let bytes = response.bytes().await?;
        log::info!("downloaded {} ({} bytes)", url, bytes.len());
        Ok(bytes.to_vec())
    }
}
