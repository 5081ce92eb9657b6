//! Crawler module for web page fetching and processing
//!
//! This module contains the core crawling logic, including:
//! - The frontier of pending URLs and its admission rules
//! - The per-domain politeness gate
//! - Content deduplication
//! - HTTP fetching and HTML extraction behind swappable traits
//! - The worker-pool engine and the session controller

mod clock;
mod controller;
mod coordinator;
mod dedup;
mod fetcher;
mod frontier;
mod parser;
mod politeness;
mod scorer;

pub use clock::{Clock, MockClock, SystemClock};
pub use controller::{
    CrawlController, MemorySessionStore, SessionHandle, SessionStore, SinkProvider,
    SqliteSinkProvider, StartOptions,
};
pub use coordinator::{Coordinator, CrawlParts};
pub use dedup::{normalize_text, ContentFingerprint, DedupIndex, DedupOutcome};
pub use fetcher::{build_http_client, FetchError, FetchedPage, Fetcher, HttpFetcher, MAX_REDIRECTS};
pub use frontier::{default_priority, Admission, Frontier, FrontierEntry, FrontierStats, Next};
pub use parser::{parse_html, ExtractError, ExtractedPage, Extractor, HtmlExtractor};
pub use politeness::{PolitenessGate, Reservation};
pub use scorer::{HeuristicScorer, ParentContext, Scorer, UrlScorer};

use crate::state::SessionId;
use chrono::{DateTime, Utc};
use std::fmt;

/// Outcome of the final attempt at a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageStatus {
    /// 2xx or 3xx response
    Ok(u16),
    /// Any other HTTP status
    HttpError(u16),
    /// Refused by robots rules; never fetched
    Blocked,
    Timeout,
    NetworkError(String),
    TooManyRedirects,
}

impl PageStatus {
    /// Classifies an HTTP status code
    pub fn from_http(status: u16) -> Self {
        if (200..400).contains(&status) {
            Self::Ok(status)
        } else {
            Self::HttpError(status)
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Whether another attempt might succeed
    ///
    /// Network errors, timeouts, 5xx and 429 are retryable; everything else
    /// is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::NetworkError(_) => true,
            Self::HttpError(status) => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Numeric HTTP status, when a response was received
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Ok(status) | Self::HttpError(status) => Some(*status),
            _ => None,
        }
    }

    /// Database string for the status kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ok(_) => "ok",
            Self::HttpError(_) => "http_error",
            Self::Blocked => "blocked",
            Self::Timeout => "timeout",
            Self::NetworkError(_) => "network_error",
            Self::TooManyRedirects => "too_many_redirects",
        }
    }

    /// Rebuilds a status from its database columns
    pub fn from_parts(kind: &str, http_status: Option<u16>, message: Option<String>) -> Option<Self> {
        match (kind, http_status) {
            ("ok", Some(status)) => Some(Self::Ok(status)),
            ("http_error", Some(status)) => Some(Self::HttpError(status)),
            ("blocked", _) => Some(Self::Blocked),
            ("timeout", _) => Some(Self::Timeout),
            ("network_error", _) => Some(Self::NetworkError(message.unwrap_or_default())),
            ("too_many_redirects", _) => Some(Self::TooManyRedirects),
            _ => None,
        }
    }

    /// Error detail worth persisting, if any
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::NetworkError(message) => Some(message.clone()),
            _ => None,
        }
    }
}

impl From<&FetchError> for PageStatus {
    fn from(error: &FetchError) -> Self {
        match error {
            FetchError::Network(message) => Self::NetworkError(message.clone()),
            FetchError::Timeout => Self::Timeout,
            FetchError::TooManyRedirects => Self::TooManyRedirects,
        }
    }
}

impl fmt::Display for PageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok(status) => write!(f, "{}", status),
            Self::HttpError(status) => write!(f, "HTTP {}", status),
            Self::Blocked => f.write_str("blocked by robots.txt"),
            Self::Timeout => f.write_str("timeout"),
            Self::NetworkError(message) => write!(f, "network error: {}", message),
            Self::TooManyRedirects => f.write_str("too many redirects"),
        }
    }
}

/// Record of one URL's crawl, emitted to the result sink
#[derive(Debug, Clone)]
pub struct CrawlResult {
    pub session_id: SessionId,
    pub url: String,
    pub depth: u32,
    pub discovered_from: Option<String>,
    pub title: Option<String>,
    pub extracted_text: String,
    /// Normalized links found on the page, in document order
    pub outbound_links: Vec<String>,
    pub status: PageStatus,
    pub fetch_duration_ms: u64,
    pub is_duplicate: bool,
    pub content_hash: Option<String>,
    /// Fetch attempts made (0 when blocked)
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl CrawlResult {
    /// Result for a URL that produced no page
    pub fn failed(
        session_id: SessionId,
        entry: &FrontierEntry,
        status: PageStatus,
        attempts: u32,
        fetch_duration_ms: u64,
    ) -> Self {
        Self {
            session_id,
            url: entry.url.to_string(),
            depth: entry.depth,
            discovered_from: entry.discovered_from.as_ref().map(|u| u.to_string()),
            title: None,
            extracted_text: String::new(),
            outbound_links: Vec::new(),
            status,
            fetch_duration_ms,
            is_duplicate: false,
            content_hash: None,
            attempts,
            timestamp: Utc::now(),
        }
    }
}
