use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Kumo-Crawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
}

/// Crawl session configuration
///
/// This is everything a single crawl session needs: where to start, how far to
/// go, how many workers to run and how politely to behave.
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// URL the session is seeded with (depth 0)
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum link depth from the base URL
    #[serde(rename = "max-depth")]
    pub max_depth: u32,

    /// Maximum number of successfully crawled pages
    #[serde(rename = "max-pages")]
    pub max_pages: u32,

    /// Number of concurrent workers
    #[serde(rename = "worker-count", default = "default_worker_count")]
    pub worker_count: u32,

    /// Lower bound of the randomized per-domain delay (milliseconds)
    #[serde(rename = "delay-min-ms", default = "default_delay_min_ms")]
    pub delay_min_ms: u64,

    /// Upper bound of the randomized per-domain delay (milliseconds)
    #[serde(rename = "delay-max-ms", default = "default_delay_max_ms")]
    pub delay_max_ms: u64,

    /// Which discovered links may be enqueued
    #[serde(rename = "domain-scope", default)]
    pub domain_scope: DomainScope,

    /// Domain patterns (e.g., "example.com" or "*.example.com") for allowlist scope
    #[serde(default)]
    pub allowlist: Vec<String>,

    /// Hard timeout for each fetch (milliseconds)
    #[serde(rename = "request-timeout-ms", default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Retries after the first attempt for retryable failures
    #[serde(rename = "retry-count", default = "default_retry_count")]
    pub retry_count: u32,

    /// Base backoff between retries (milliseconds), doubled per retry
    #[serde(rename = "retry-backoff-ms", default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// How long in-flight fetches may run after cancellation (milliseconds)
    #[serde(rename = "grace-period-ms", default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Capacity of the result queue between workers and the storage sink
    #[serde(rename = "result-buffer", default = "default_result_buffer")]
    pub result_buffer: usize,

    /// Whether robots.txt is fetched and honoured
    #[serde(rename = "respect-robots", default = "default_true")]
    pub respect_robots: bool,

    /// Maximum characters of extracted text kept per record (0 = unlimited)
    #[serde(rename = "max-text-length", default)]
    pub max_text_length: usize,
}

/// Domain scope policy for discovered links
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DomainScope {
    /// Only links on the base URL's host
    #[default]
    SameDomain,
    /// Only links whose host matches one of the allowlist patterns
    Allowlist,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Path to the markdown summary file
    #[serde(rename = "summary-path")]
    pub summary_path: String,
}

/// Frontier scoring configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScorerConfig {
    #[serde(default)]
    pub kind: ScorerKind,

    /// Topic keywords that raise a URL's score
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScorerKind {
    #[default]
    None,
    Heuristic,
}

impl CrawlerConfig {
    /// Creates a configuration with defaults for everything but the crawl bounds
    pub fn new(base_url: impl Into<String>, max_depth: u32, max_pages: u32) -> Self {
        Self {
            base_url: base_url.into(),
            max_depth,
            max_pages,
            worker_count: default_worker_count(),
            delay_min_ms: default_delay_min_ms(),
            delay_max_ms: default_delay_max_ms(),
            domain_scope: DomainScope::SameDomain,
            allowlist: Vec::new(),
            request_timeout_ms: default_request_timeout_ms(),
            retry_count: default_retry_count(),
            retry_backoff_ms: default_retry_backoff_ms(),
            grace_period_ms: default_grace_period_ms(),
            result_buffer: default_result_buffer(),
            respect_robots: true,
            max_text_length: 0,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn delay_range(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.delay_min_ms),
            Duration::from_millis(self.delay_max_ms),
        )
    }

    /// Backoff before the given retry (1-based)
    pub fn retry_backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

impl UserAgentConfig {
    /// Formats the header value: CrawlerName/Version (+ContactURL)
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{})",
            self.crawler_name, self.crawler_version, self.contact_url
        )
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "KumoCrawl".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: "https://example.com/bot".to_string(),
        }
    }
}

fn default_worker_count() -> u32 {
    4
}

fn default_delay_min_ms() -> u64 {
    1000
}

fn default_delay_max_ms() -> u64 {
    3000
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_retry_count() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_grace_period_ms() -> u64 {
    5000
}

fn default_result_buffer() -> usize {
    64
}

fn default_true() -> bool {
    true
}
