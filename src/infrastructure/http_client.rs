//! HTTP client for listing acquisition with retry, timeout and optional
//! rate limiting.
//!
//! `RetryingFetcher` is shared by every in-flight task of a run; it holds no
//! per-request mutable state.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use reqwest::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::infrastructure::config::{Settings, defaults};

/// Server-side statuses that are retried.
pub const RETRYABLE_STATUSES: [u16; 4] = [500, 502, 503, 504];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Request to {url} timed out after {timeout_seconds}s")]
    Timeout { url: String, timeout_seconds: u64 },

    #[error("HTTP error {status}: {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Request cancelled: {url}")]
    Cancelled { url: String },

    #[error("Invalid HTTP client configuration: {0}")]
    Configuration(String),
}

impl FetchError {
    /// Transient failures that count against the retry budget.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::HttpStatus { status, .. } => RETRYABLE_STATUSES.contains(status),
            Self::Cancelled { .. } | Self::Configuration(_) => false,
        }
    }
}

/// Body and final status of a GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchedDocument {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Anything that can GET a document. The pipeline only talks to this trait.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError>;
}

#[async_trait]
impl<T: DocumentFetcher + ?Sized> DocumentFetcher for Arc<T> {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        (**self).fetch(url).await
    }
}

/// Retry budget and backoff schedule.
///
/// The first retry is immediate; the sleep before retry `n >= 2` is
/// `backoff_factor * 2^(n-1)` seconds, capped at `backoff_max`. With a factor
/// of 1 that is 0, 2, 4, 8, 16 seconds. A zero factor disables sleeping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor_seconds: f64,
    pub backoff_max_seconds: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            backoff_factor_seconds: defaults::BACKOFF_FACTOR_SECONDS,
            backoff_max_seconds: defaults::BACKOFF_MAX_SECONDS,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry <= 1 || self.backoff_factor_seconds <= 0.0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let seconds = (self.backoff_factor_seconds * 2f64.powi(exponent))
            .min(self.backoff_max_seconds)
            .max(0.0);
        Duration::from_secs_f64(seconds)
    }
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub retry: RetryPolicy,
    /// Shared courtesy limit; `None` disables rate limiting.
    pub max_requests_per_second: Option<u32>,
    pub follow_redirects: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".to_string(),
            timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            retry: RetryPolicy::default(),
            max_requests_per_second: None,
            follow_redirects: true,
        }
    }
}

impl HttpClientConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            timeout_seconds: settings.request_timeout_seconds,
            retry: RetryPolicy {
                max_retries: settings.max_retries,
                backoff_factor_seconds: settings.backoff_factor_seconds,
                backoff_max_seconds: defaults::BACKOFF_MAX_SECONDS,
            },
            max_requests_per_second: settings.max_requests_per_second,
            ..Self::default()
        }
    }
}

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// GET with bounded automatic retry on transient failures.
#[derive(Clone)]
pub struct RetryingFetcher {
    client: Client,
    config: HttpClientConfig,
    rate_limiter: Option<Arc<DirectRateLimiter>>,
    cancellation: CancellationToken,
}

impl RetryingFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(&config.user_agent)
            .cookie_store(true)
            .gzip(true)
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            })
            .build()
            .map_err(|e| FetchError::Configuration(format!("Failed to create HTTP client: {e}")))?;

        let rate_limiter = match config.max_requests_per_second {
            Some(rps) => {
                let rps = NonZeroU32::new(rps).ok_or_else(|| {
                    FetchError::Configuration("Rate limit must be greater than 0".to_string())
                })?;
                info!("🎯 Rate limiting requests to {} per second", rps);
                Some(Arc::new(RateLimiter::direct(Quota::per_second(rps))))
            }
            None => None,
        };

        Ok(Self {
            client,
            config,
            rate_limiter,
            cancellation: CancellationToken::new(),
        })
    }

    /// Refuse new attempts and cut backoff sleeps short once `token` is
    /// cancelled. Requests already sent are not interrupted.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        debug!("🌐 HTTP GET: {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify(url, &e))?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| self.classify(url, &e))?;

        Ok(FetchedDocument::new(url, status.as_u16(), body.to_vec()))
    }

    fn classify(&self, url: &str, error: &reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                timeout_seconds: self.config.timeout_seconds,
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }

    async fn fetch_with_retry(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        let policy = self.config.retry;
        let mut retries = 0u32;

        loop {
            // Checked between attempts only; a request already on the wire
            // runs to completion.
            if self.cancellation.is_cancelled() {
                return Err(FetchError::Cancelled { url: url.to_string() });
            }
            let attempt = self.fetch_once(url).await;

            let error = match attempt {
                Ok(document) if RETRYABLE_STATUSES.contains(&document.status) => {
                    FetchError::HttpStatus {
                        url: url.to_string(),
                        status: document.status,
                    }
                }
                Ok(document) => {
                    if retries > 0 {
                        info!("Fetched {} after {} retries", url, retries);
                    }
                    return Ok(document);
                }
                Err(e) if e.is_transient() => e,
                Err(e) => return Err(e),
            };

            if retries >= policy.max_retries {
                warn!("⚠️ Giving up on {} after {} attempts: {}", url, retries + 1, error);
                return Err(error);
            }

            retries += 1;
            let delay = policy.delay_for_retry(retries);
            warn!(
                "Attempt {} failed for {}: {} (retrying in {:?})",
                retries, url, error, delay
            );

            if !delay.is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = self.cancellation.cancelled() => {
                        return Err(FetchError::Cancelled { url: url.to_string() });
                    }
                }
            }
        }
    }
}

#[async_trait]
impl DocumentFetcher for RetryingFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        self.fetch_with_retry(url).await
    }
}
