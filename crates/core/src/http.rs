//! Outbound content fetching with a bounded retry policy.
//!
//! [`HttpClient`] is the single-attempt seam (mocked in tests);
//! [`Fetcher`] layers the retry policy on top of it and turns a persistent
//! failure into a [`DownloadError`] naming the target URL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::asset::{AssetData, MIME_OCTET_STREAM};
use crate::error::{DownloadError, HttpError};

/// Product user-agent sent with every outbound request.
pub const USER_AGENT: &str =
    "Mozilla/5.0 (compatible; Pix360/0.1; +https://kumig.it/kumisystems/pix360)";

/// Default number of attempts per fetch.
pub const DEFAULT_RETRIES: u32 = 3;

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A single HTTP GET attempt.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<AssetData, HttpError>;
}

/// Real HTTP client backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Build a client that identifies itself with [`USER_AGENT`].
    pub fn new() -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| HttpError::Request(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str, timeout: Duration) -> Result<AssetData, HttpError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HttpError::Timeout {
                        timeout_secs: timeout.as_secs(),
                    }
                } else {
                    HttpError::Request(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(HttpError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| MIME_OCTET_STREAM.to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| HttpError::Body(e.to_string()))?;

        Ok(AssetData::new(bytes.to_vec(), mime_type))
    }
}

/// How often and how long a fetch is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    pub attempts: u32,
    /// Timeout applied to each attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRIES,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Retrying fetcher shared by all downloader plugins.
#[derive(Clone)]
pub struct Fetcher {
    client: Arc<dyn HttpClient>,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(client: Arc<dyn HttpClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// A fetcher using [`ReqwestClient`] and the given policy.
    pub fn reqwest(policy: RetryPolicy) -> Result<Self, HttpError> {
        Ok(Self::new(Arc::new(ReqwestClient::new()?), policy))
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Fetch `url`, retrying up to the policy's attempt count.
    ///
    /// Each attempt is bounded by the policy timeout regardless of the
    /// client; an attempt that runs out counts as a failed attempt.
    ///
    /// Returns the first successful response. When every attempt fails the
    /// last underlying failure is wrapped in [`DownloadError::Exhausted`].
    pub async fn fetch(&self, url: &str) -> Result<AssetData, DownloadError> {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            tracing::debug!(url, attempt, "Opening");

            let timeout = self.policy.timeout;
            let outcome = tokio::time::timeout(timeout, self.client.get(url, timeout))
                .await
                .unwrap_or_else(|_| {
                    Err(HttpError::Timeout {
                        timeout_secs: timeout.as_secs(),
                    })
                });

            match outcome {
                Ok(content) => {
                    tracing::debug!(url, attempt, bytes = content.len(), "Fetched");
                    return Ok(content);
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(url, attempt, error = %e, "Fetch attempt failed, retrying");
                }
                Err(e) => {
                    tracing::warn!(url, attempt, error = %e, "Fetch attempt failed, giving up");
                    return Err(DownloadError::Exhausted {
                        url: url.to_string(),
                        attempts,
                        source: e,
                    });
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
