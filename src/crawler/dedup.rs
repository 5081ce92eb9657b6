//! Content deduplication
//!
//! Pages are fingerprinted by a SHA-256 of their normalized text, so mirrors
//! that differ only in whitespace or letter case are recognised as duplicates.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use url::Url;

/// Hex SHA-256 of a page's normalized text
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    /// Fingerprints extracted text; `None` when there is no text to compare
    pub fn of(text: &str) -> Option<Self> {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            return None;
        }
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        Some(Self(hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Collapses all whitespace runs to one space, trims and lowercases
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Result of [`DedupIndex::record_if_new`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupOutcome {
    pub is_new_url: bool,
    pub is_duplicate_content: bool,
}

#[derive(Debug, Default)]
struct Inner {
    visited: HashSet<String>,
    /// Fingerprint -> first URL that produced it
    fingerprints: HashMap<ContentFingerprint, String>,
}

/// Tracks visited URLs and the content they produced
#[derive(Debug, Default)]
pub struct DedupIndex {
    inner: Mutex<Inner>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fetched URL and its content fingerprint
    ///
    /// A URL is recorded once; later calls for it return `is_new_url = false`
    /// and change nothing. Content already seen under another URL marks the
    /// page as a duplicate while still recording the URL as visited.
    pub fn record_if_new(
        &self,
        url: &Url,
        fingerprint: Option<&ContentFingerprint>,
    ) -> DedupOutcome {
        let mut inner = self.inner.lock();

        if !inner.visited.insert(url.as_str().to_string()) {
            return DedupOutcome {
                is_new_url: false,
                is_duplicate_content: false,
            };
        }

        let is_duplicate_content = match fingerprint {
            Some(fp) => match inner.fingerprints.get(fp) {
                Some(first) => first != url.as_str(),
                None => {
                    inner
                        .fingerprints
                        .insert(fp.clone(), url.as_str().to_string());
                    false
                }
            },
            None => false,
        };

        DedupOutcome {
            is_new_url: true,
            is_duplicate_content,
        }
    }

    /// URL that first produced the fingerprint
    pub fn original_for(&self, fingerprint: &ContentFingerprint) -> Option<String> {
        self.inner.lock().fingerprints.get(fingerprint).cloned()
    }

    /// Number of distinct content fingerprints seen
    pub fn unique_content_count(&self) -> usize {
        self.inner.lock().fingerprints.len()
    }

    pub fn visited_count(&self) -> usize {
        self.inner.lock().visited.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(path: &str) -> Url {
        Url::parse(&format!("https://example.com{}", path)).unwrap()
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Hello \n\t World  "), "hello world");
        assert_eq!(normalize_text(" \n "), "");
    }

    #[test]
    fn test_fingerprint_tolerates_formatting() {
        let a = ContentFingerprint::of("Hello   World\n").unwrap();
        let b = ContentFingerprint::of("hello world").unwrap();
        let c = ContentFingerprint::of("hello there").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_empty_text_has_no_fingerprint() {
        assert!(ContentFingerprint::of("   ").is_none());
    }

    #[test]
    fn test_record_if_new_is_idempotent() {
        let index = DedupIndex::new();
        let fp = ContentFingerprint::of("page text");

        let first = index.record_if_new(&url("/a"), fp.as_ref());
        assert!(first.is_new_url);
        assert!(!first.is_duplicate_content);

        let second = index.record_if_new(&url("/a"), fp.as_ref());
        assert!(!second.is_new_url);
        assert!(!second.is_duplicate_content);
        assert_eq!(index.visited_count(), 1);
    }

    #[test]
    fn test_duplicate_content_under_new_url() {
        let index = DedupIndex::new();
        let fp_a = ContentFingerprint::of("Same   text");
        let fp_b = ContentFingerprint::of("same text");

        index.record_if_new(&url("/a"), fp_a.as_ref());
        let outcome = index.record_if_new(&url("/b"), fp_b.as_ref());

        assert!(outcome.is_new_url);
        assert!(outcome.is_duplicate_content);
        assert_eq!(index.unique_content_count(), 1);
        assert_eq!(index.visited_count(), 2);
        assert_eq!(
            index.original_for(fp_b.as_ref().unwrap()).as_deref(),
            Some("https://example.com/a")
        );
    }

    #[test]
    fn test_pages_without_text_are_never_duplicates() {
        let index = DedupIndex::new();
        assert!(!index.record_if_new(&url("/a"), None).is_duplicate_content);
        assert!(!index.record_if_new(&url("/b"), None).is_duplicate_content);
        assert_eq!(index.unique_content_count(), 0);
    }
}
