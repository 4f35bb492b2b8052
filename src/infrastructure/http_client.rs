//! HTTP client for supplier crawling with rate limiting and error handling
//!
//! Provides the static fetch path used by discovery and detail collection.
//! Every request waits on a token-bucket rate limiter and is bounded by the
//! configured timeout so a hung supplier site cannot stall the pipeline.
//! The [`PageFetcher`] trait is the seam the discovery driver and pipeline
//! depend on; [`SupplierFetcher`] composes this client with the headless
//! renderer fallback.

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use reqwest::{
    header::{HeaderMap, HeaderValue, USER_AGENT},
    Client,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

use crate::infrastructure::config::CrawlingConfig;
use crate::infrastructure::headless::HeadlessRenderer;

/// Fetch failures. Discovery treats all of these as transient: the walk
/// stops advancing and returns partial results instead of propagating.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server returned status {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("headless render failed: {0}")]
    Render(String),
}

/// Retrieves a page's HTML given a URL.
///
/// `render_html` is the secondary headless path used once per page when a
/// static fetch yields no usable links.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError>;

    /// Detail-page fetch. Unlike listing fetches, implementations may
    /// retry transient failures; pagination never does.
    async fn fetch_detail_html(&self, url: &str) -> Result<String, FetchError> {
        self.fetch_html(url).await
    }

    async fn render_html(&self, url: &str) -> Result<String, FetchError>;
}

/// Rate-limited reqwest wrapper for static fetches.
pub struct HttpClient {
    client: Client,
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    timeout: Duration,
    detail_retry_count: u32,
    retry_delay: Duration,
}

impl HttpClient {
    pub fn new(config: &CrawlingConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );

        let timeout = Duration::from_secs(config.request_timeout_seconds);
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second.max(1))
                .context("Rate limit must be greater than 0")?,
        );
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self {
            client,
            rate_limiter,
            timeout,
            detail_retry_count: config.detail_retry_count,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    /// Fetch a URL and return its body text.
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        self.rate_limiter.until_ready().await;

        tracing::debug!("Fetching URL: {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

        tracing::debug!("Fetched {} ({} chars)", url, text.len());
        Ok(text)
    }

    /// Fetch a detail page, retrying transient failures with a jittered
    /// delay. Listing pages never retry; their failures end pagination.
    pub async fn get_text_with_retry(&self, url: &str) -> Result<String, FetchError> {
        let mut last_err = FetchError::Network("no attempts made".to_string());

        for attempt in 0..=self.detail_retry_count {
            if attempt > 0 {
                let jitter = Duration::from_millis(fastrand::u64(0..=self.retry_delay.as_millis() as u64));
                sleep(self.retry_delay + jitter).await;
                tracing::debug!("Retrying fetch of {} (attempt {})", url, attempt + 1);
            }
            match self.get_text(url).await {
                Ok(text) => return Ok(text),
                Err(err) => last_err = err,
            }
        }

        Err(last_err)
    }
}

/// Static fetch plus headless render fallback, as one [`PageFetcher`].
pub struct SupplierFetcher {
    http: HttpClient,
    renderer: HeadlessRenderer,
}

impl SupplierFetcher {
    pub fn new(config: &CrawlingConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(config)?,
            renderer: HeadlessRenderer::new(Duration::from_secs(config.render_timeout_seconds)),
        })
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }
}

#[async_trait]
impl PageFetcher for SupplierFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        self.http.get_text(url).await
    }

    async fn fetch_detail_html(&self, url: &str) -> Result<String, FetchError> {
        self.http.get_text_with_retry(url).await
    }

    async fn render_html(&self, url: &str) -> Result<String, FetchError> {
        self.renderer.render(url).await
    }
}
