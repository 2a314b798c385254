//! HTTP egress
//!
//! All network access of the stapling engine goes through [`HttpTransport`],
//! so the timeout, proxy and body cap are decided once, from configuration,
//! and tests can substitute a transport that never touches the network.

use crate::config::StaplingConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Content type of OCSP request bodies
pub const OCSP_REQUEST_CONTENT_TYPE: &str = "application/ocsp-request";

/// Content type of OCSP response bodies
pub const OCSP_RESPONSE_CONTENT_TYPE: &str = "application/ocsp-response";

/// Minimal HTTP client interface
///
/// Both methods fail with `TransportError::Status` on a non-2xx response and
/// with `TransportError::TooLarge` when the body exceeds `limit` bytes.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// GET `url` and return the response body
    async fn get(&self, url: &str, limit: usize) -> Result<Vec<u8>, TransportError>;

    /// POST `body` to `url` and return the response body
    async fn post(
        &self,
        url: &str,
        content_type: &str,
        body: Vec<u8>,
        limit: usize,
    ) -> Result<Vec<u8>, TransportError>;
}

/// [`HttpTransport`] backed by `reqwest`
///
/// The client is reused for connection pooling.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with the given per-request timeout and optional proxy
    ///
    /// Without an explicit proxy the usual proxy environment variables apply.
    pub fn new(timeout: Duration, proxy: Option<&str>) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ocsp-stapler/", env!("CARGO_PKG_VERSION")));

        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| {
                TransportError::Client(format!("Invalid proxy '{}': {}", proxy, e))
            })?;
            builder = builder.proxy(proxy);
        }

        let http_client = builder
            .build()
            .map_err(|e| TransportError::Client(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    /// Create a transport from the stapling configuration
    pub fn from_config(config: &StaplingConfig) -> Result<Self, TransportError> {
        Self::new(config.http_timeout(), config.http_proxy.as_deref())
    }

    /// Wrap an already configured client
    pub fn from_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    async fn read_body(
        mut response: reqwest::Response,
        limit: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            if length > limit as u64 {
                return Err(TransportError::TooLarge { limit });
            }
        }

        // Content-Length may be absent or wrong; enforce the cap while reading
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() + chunk.len() > limit {
                return Err(TransportError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, limit: usize) -> Result<Vec<u8>, TransportError> {
        debug!(url = %url, "HTTP GET");
        let response = self.http_client.get(url).send().await?;
        Self::read_body(response, limit).await
    }

    async fn post(
        &self,
        url: &str,
        content_type: &str,
        body: Vec<u8>,
        limit: usize,
    ) -> Result<Vec<u8>, TransportError> {
        debug!(url = %url, content_type = %content_type, size = body.len(), "HTTP POST");
        let response = self
            .http_client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::ACCEPT, OCSP_RESPONSE_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;
        Self::read_body(response, limit).await
    }
}
