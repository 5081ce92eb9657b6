//! URL handling module for Kumo-Crawl
//!
//! This module provides URL normalization, domain extraction, wildcard matching
//! and the scope policy that decides which discovered links may be enqueued.

mod domain;
mod matcher;
mod normalize;

use crate::config::{CrawlerConfig, DomainScope};
use crate::UrlError;
use url::Url;

// Re-export main functions
pub use domain::{extract_domain, robots_url};
pub use matcher::matches_wildcard;
pub use normalize::{normalize_parsed, normalize_url};

/// File extensions that are never worth fetching as pages
const EXCLUDED_EXTENSIONS: &[&str] = &[
    "pdf", "jpg", "jpeg", "png", "gif", "bmp", "svg", "webp", "ico", "mp4", "avi", "mov", "wmv",
    "flv", "webm", "mp3", "wav", "flac", "aac", "ogg", "zip", "rar", "7z", "tar", "gz", "exe",
    "msi", "dmg", "deb", "rpm", "doc", "docx", "xls", "xlsx", "ppt", "pptx",
];

/// Returns true if the URL path points at a binary resource (image, media,
/// archive, office document) rather than a page
pub fn is_excluded_resource(url: &Url) -> bool {
    let last = url.path().rsplit('/').next().unwrap_or("");
    match last.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = ext.to_ascii_lowercase();
            EXCLUDED_EXTENSIONS.contains(&ext.as_str())
        }
        _ => false,
    }
}

/// Decides whether a discovered link belongs to the crawl
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopePolicy {
    /// Only the exact host of the base URL
    SameDomain(String),
    /// Hosts matching any of the patterns (see [`matches_wildcard`])
    Allowlist(Vec<String>),
}

impl ScopePolicy {
    /// Builds the policy for a session from its configuration
    pub fn from_config(config: &CrawlerConfig) -> Result<Self, UrlError> {
        match config.domain_scope {
            DomainScope::SameDomain => {
                let base = normalize_url(&config.base_url)?;
                let domain = extract_domain(&base).ok_or(UrlError::MissingDomain)?;
                Ok(Self::SameDomain(domain))
            }
            DomainScope::Allowlist => Ok(Self::Allowlist(
                config.allowlist.iter().map(|p| p.to_lowercase()).collect(),
            )),
        }
    }

    /// Returns true if the URL's host is inside the crawl scope
    pub fn allows(&self, url: &Url) -> bool {
        let Some(domain) = extract_domain(url) else {
            return false;
        };

        match self {
            Self::SameDomain(base) => domain == *base,
            Self::Allowlist(patterns) => patterns.iter().any(|p| matches_wildcard(p, &domain)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_same_domain_scope() {
        let config = CrawlerConfig::new("https://Example.com/start", 2, 10);
        let scope = ScopePolicy::from_config(&config).unwrap();

        assert_eq!(scope, ScopePolicy::SameDomain("example.com".to_string()));
        assert!(scope.allows(&url("https://example.com/other")));
        assert!(scope.allows(&url("http://example.com/plain")));
        assert!(!scope.allows(&url("https://blog.example.com/")));
        assert!(!scope.allows(&url("https://other.org/")));
    }

    #[test]
    fn test_allowlist_scope() {
        let mut config = CrawlerConfig::new("https://example.com/", 2, 10);
        config.domain_scope = DomainScope::Allowlist;
        config.allowlist = vec!["*.Example.com".to_string(), "docs.rs".to_string()];
        let scope = ScopePolicy::from_config(&config).unwrap();

        assert!(scope.allows(&url("https://example.com/")));
        assert!(scope.allows(&url("https://blog.example.com/post")));
        assert!(scope.allows(&url("https://docs.rs/crate")));
        assert!(!scope.allows(&url("https://www.docs.rs/")));
        assert!(!scope.allows(&url("https://example.org/")));
    }

    #[test]
    fn test_excluded_resources() {
        assert!(is_excluded_resource(&url("https://example.com/report.PDF")));
        assert!(is_excluded_resource(&url("https://example.com/img/logo.png?v=2")));
        assert!(is_excluded_resource(&url("https://example.com/dl/archive.tar.gz")));

        assert!(!is_excluded_resource(&url("https://example.com/page.html")));
        assert!(!is_excluded_resource(&url("https://example.com/docs")));
        assert!(!is_excluded_resource(&url("https://example.com/.png")));
        assert!(!is_excluded_resource(&url("https://example.com/pdf/")));
    }
}
