use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

pub const MAX_RETRIES: u32 = 3;
pub const BASE_BACKOFF_MS: u64 = 2000;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0 Safari/537.36";

/// Typed fetch failure; each variant maps onto one record status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("status {0}")]
    Status(u16),
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("{0}")]
    Network(String),
}

/// The one external collaborator the processor calls: page body on
/// HTTP 200, typed error otherwise.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

// ── HTTP implementation ────────────────────────────────────────────

pub struct HttpFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(HttpFetcher {
            client,
            timeout_secs,
        })
    }

    fn classify(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout_secs)
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }
        resp.text().await.map_err(|e| self.classify(e))
    }
}

// ── Bounded retry ──────────────────────────────────────────────────

/// Retry decorator around any fetcher: transient failures back off
/// exponentially up to `max_retries` extra attempts, then the last error
/// surfaces. Deterministic failures (404 and other 4xx) pass straight
/// through.
pub struct RetryingFetcher<F> {
    inner: F,
    max_retries: u32,
    base_backoff_ms: u64,
}

impl<F> RetryingFetcher<F> {
    pub fn new(inner: F, max_retries: u32, base_backoff_ms: u64) -> Self {
        RetryingFetcher {
            inner,
            max_retries,
            base_backoff_ms,
        }
    }
}

fn transient(err: &FetchError) -> bool {
    match err {
        FetchError::Timeout(_) => true,
        FetchError::Network(_) => true,
        FetchError::Status(code) => matches!(code, 408 | 429) || *code >= 500,
    }
}

#[async_trait]
impl<F: PageFetcher> PageFetcher for RetryingFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 0u32;
        loop {
            match self.inner.fetch(url).await {
                Ok(body) => return Ok(body),
                Err(e) if transient(&e) && attempt < self.max_retries => {
                    let backoff =
                        Duration::from_millis(self.base_backoff_ms * 2u64.pow(attempt));
                    warn!(
                        "transient failure on {} (attempt {}/{}): {}; backing off {:.1}s",
                        url,
                        attempt + 1,
                        self.max_retries,
                        e,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ── Test support ───────────────────────────────────────────────────


// ── Tests ──────────────────────────────────────────────────────────
