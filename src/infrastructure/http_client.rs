//! HTTP client for page and image retrieval with rate limiting
//!
//! [`PageFetcher`] is the seam extractors and the image processor depend on;
//! [`HttpClient`] is the production implementation backed by `reqwest` and a
//! `governor` requests-per-second quota.

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use reqwest::{
    Client, Response,
    header::{ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT},
};
use std::num::NonZeroU32;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::FetchError;

/// HTTP client configuration for crawling
#[derive(Debug, Clone, serde::Serialize)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
    pub follow_redirects: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: crate::infrastructure::config::defaults::USER_AGENT.to_string(),
            timeout_seconds: crate::infrastructure::config::defaults::REQUEST_TIMEOUT_SECONDS,
            max_requests_per_second: crate::infrastructure::config::defaults::MAX_REQUESTS_PER_SECOND,
            follow_redirects: true,
        }
    }
}

impl From<&crate::infrastructure::config::ScrapingConfig> for HttpClientConfig {
    fn from(scraping: &crate::infrastructure::config::ScrapingConfig) -> Self {
        Self {
            user_agent: scraping.user_agent.clone(),
            timeout_seconds: scraping.request_timeout_seconds,
            max_requests_per_second: scraping.max_requests_per_second,
            follow_redirects: true,
        }
    }
}

/// A fetched HTML document.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects, used to resolve relative links
    pub url: Url,
    pub body: String,
}

/// Raw image bytes with their declared content type.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub data: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &Url, cancel: &CancellationToken) -> Result<FetchedPage, FetchError>;

    /// Fetch an image, refusing bodies larger than `max_bytes` and non-image content.
    async fn fetch_image(&self, url: &Url, max_bytes: usize) -> Result<FetchedImage, FetchError>;
}

/// Enhanced HTTP client with rate limiting for respectful crawling
pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    config: HttpClientConfig,
}

impl HttpClient {
    /// Create a new HTTP client with the given configuration
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            })
            .build()
            .context("Failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .context("Rate limit must be greater than 0")?,
        );

        Ok(Self {
            client,
            rate_limiter: RateLimiter::direct(quota),
            config,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    async fn send(&self, url: &Url) -> Result<Response, FetchError> {
        self.rate_limiter.until_ready().await;

        tracing::debug!("Fetching URL: {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify_reqwest_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch_page(&self, url: &Url, cancel: &CancellationToken) -> Result<FetchedPage, FetchError> {
        let cancelled = || FetchError::Cancelled { url: url.to_string() };
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let response = tokio::select! {
            result = self.send(url) => result?,
            () = cancel.cancelled() => {
                tracing::warn!("🛑 HTTP request cancelled for URL: {}", url);
                return Err(cancelled());
            }
        };

        let final_url = response.url().clone();
        let body = tokio::select! {
            result = response.text() => result.map_err(|e| classify_reqwest_error(url, &e))?,
            () = cancel.cancelled() => return Err(cancelled()),
        };

        tracing::debug!("Fetched {} ({} chars)", final_url, body.len());
        Ok(FetchedPage { url: final_url, body })
    }

    async fn fetch_image(&self, url: &Url, max_bytes: usize) -> Result<FetchedImage, FetchError> {
        let mut response = self.send(url).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !content_type.starts_with("image/") {
            return Err(FetchError::NotAnImage {
                url: url.to_string(),
                content_type,
            });
        }

        let too_large = || FetchError::TooLarge {
            url: url.to_string(),
            limit: max_bytes,
        };
        if response
            .content_length()
            .is_some_and(|len| usize::try_from(len).map_or(true, |len| len > max_bytes))
        {
            return Err(too_large());
        }

        let mut data = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| classify_reqwest_error(url, &e))?
        {
            if data.len() + chunk.len() > max_bytes {
                return Err(too_large());
            }
            data.extend_from_slice(&chunk);
        }

        Ok(FetchedImage { data, content_type })
    }
}

fn classify_reqwest_error(url: &Url, error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout { url: url.to_string() }
    } else if let Some(status) = error.status() {
        FetchError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        }
    } else {
        FetchError::network(url.as_str(), error)
    }
}
