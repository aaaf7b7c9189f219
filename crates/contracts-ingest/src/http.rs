//! HTTP access to the snapshot mirror
//!
//! One shared `reqwest::Client`. Non-2xx responses are errors; transient
//! failures (connect, timeout, 5xx, 429) are retried with a linear backoff.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpFetcher {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        })
    }

    /// GET a page as text (index listings)
    pub async fn get_text(&self, url: &Url) -> Result<String> {
        let bytes = self.get_bytes(url).await?;
        String::from_utf8(bytes)
            .map_err(|e| SyncError::decode(format!("{} is not valid UTF-8: {}", url, e)))
    }

    /// GET a resource as raw bytes (snapshot archives)
    pub async fn get_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.get_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() && attempt <= self.max_retries => {
                    let delay = self.retry_delay * attempt;
                    warn!(
                        url = %url,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Request failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once(&self, url: &Url) -> Result<Vec<u8>> {
        debug!(url = %url, "GET");
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }

        let bytes = response.bytes().await?;
        debug!(url = %url, bytes = bytes.len(), "Fetched");
        Ok(bytes.to_vec())
    }
}
