//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with proper user agent strings
//! - GET requests with a per-request timeout
//! - Redirect handling (bounded chain)
//! - Error classification into [`FetchError`]
//!
//! The crawl engine only sees the [`Fetcher`] trait, so tests can swap in
//! an in-process fake.

use crate::config::UserAgentConfig;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{redirect::Policy, Client};
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

/// Maximum redirect hops followed before giving up
pub const MAX_REDIRECTS: usize = 10;

/// A fetched HTTP response, whatever its status
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects
    pub final_url: Url,
    pub status: u16,
    pub headers: HeaderMap,
    /// Content-Type header value (empty if absent)
    pub content_type: String,
    pub body: String,
    pub elapsed: Duration,
}

impl FetchedPage {
    /// Builds a page with no headers; handy for fakes
    pub fn new(final_url: Url, status: u16, content_type: &str, body: impl Into<String>) -> Self {
        Self {
            final_url,
            status,
            headers: HeaderMap::new(),
            content_type: content_type.to_string(),
            body: body.into(),
            elapsed: Duration::ZERO,
        }
    }

    /// Returns true if the body should be handed to the HTML extractor
    pub fn is_html(&self) -> bool {
        let ct = self.content_type.to_ascii_lowercase();
        ct.is_empty() || ct.contains("text/html") || ct.contains("application/xhtml")
    }
}

/// Transport-level fetch failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("too many redirects")]
    TooManyRedirects,
}

impl FetchError {
    /// Network errors and timeouts are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }
}

/// Retrieves a URL
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchedPage, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
///
/// # Example
///
/// ```no_run
/// use kumo_crawl::config::UserAgentConfig;
/// use kumo_crawl::crawler::build_http_client;
///
/// let client = build_http_client(&UserAgentConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`Fetcher`] backed by reqwest
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &UserAgentConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchedPage, FetchError> {
        let started = Instant::now();

        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers = response.headers().clone();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = response.text().await.map_err(classify_error)?;

        Ok(FetchedPage {
            final_url,
            status,
            headers,
            content_type,
            body,
            elapsed: started.elapsed(),
        })
    }
}

fn classify_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_redirect() {
        FetchError::TooManyRedirects
    } else if e.is_connect() {
        FetchError::Network(format!("connection failed: {}", e))
    } else {
        FetchError::Network(e.to_string())
    }
}
