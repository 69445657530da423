//! Remote image fetching.
//!
//! The fetch stage only needs two operations: a HEAD request to learn the
//! advertised size, and a GET for the body. [`ReqwestFetchClient`] is the
//! production implementation; tests substitute in-memory clients.

use crate::config::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::header::{HeaderMap, CONTENT_LENGTH};
use std::time::Duration;

/// Response of a GET request.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body. Empty for non-2xx responses.
    pub body: Bytes,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP-like fetch collaborator.
#[async_trait]
pub trait FetchClient: Send + Sync {
    /// Content length advertised by the server, if any.
    async fn head(&self, url: &str) -> Result<Option<u64>>;

    /// Download `url`.
    async fn get(&self, url: &str) -> Result<FetchResponse>;
}

/// [`FetchClient`] backed by a pooled reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestFetchClient {
    client: reqwest::Client,
    /// Stop reading a body after this many bytes
    max_body_bytes: u64,
}

impl ReqwestFetchClient {
    /// Wrap an existing client.
    pub fn new(client: reqwest::Client, max_body_bytes: u64) -> Self {
        Self {
            client,
            max_body_bytes,
        }
    }

    /// Build a client with connection pool settings from the configuration.
    ///
    /// The request timeout equals the job timeout.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = &config.http_client;
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(http.idle_conn_timeout_secs))
            .pool_max_idle_per_host(http.max_idle_conns_per_host)
            .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
            .timeout(Duration::from_secs(config.processing.job_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self::new(client, config.processing.max_image_size_bytes))
    }
}

#[async_trait]
impl FetchClient for ReqwestFetchClient {
    async fn head(&self, url: &str) -> Result<Option<u64>> {
        let response = self.client.head(url).send().await?;
        Ok(content_length(response.headers()))
    }

    async fn get(&self, url: &str) -> Result<FetchResponse> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status().as_u16();

        if !response.status().is_success() {
            return Ok(FetchResponse {
                status,
                body: Bytes::new(),
            });
        }

        // Read at most one byte past the limit so the size check still fires
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_body_bytes {
                tracing::debug!("Body of {} exceeds {} bytes, stopping download", url, self.max_body_bytes);
                break;
            }
        }

        Ok(FetchResponse {
            status,
            body: body.freeze(),
        })
    }
}

/// Parse the `Content-Length` header.
///
/// reqwest's `Response::content_length` reports the body size hint, which is
/// zero for HEAD responses, so the header is read directly.
fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}
