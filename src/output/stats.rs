//! Crawl statistics
//!
//! This module aggregates crawl results into link and content statistics and
//! prints them for the `--stats` mode.

use crate::crawler::{CrawlResult, PageStatus};
use crate::url::extract_domain;
use std::collections::{BTreeMap, HashSet};
use url::Url;

/// Crawl statistics summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlStatistics {
    /// Total number of page records (every attempted or blocked URL)
    pub total_pages: u64,

    /// Pages fetched with a 2xx/3xx status
    pub successful_pages: u64,

    /// Pages whose final attempt failed
    pub failed_pages: u64,

    /// Pages refused by robots rules
    pub blocked_pages: u64,

    /// Successful pages whose content was seen under another URL
    pub duplicate_pages: u64,

    /// Number of unique domains among the recorded pages
    pub unique_domains: u64,

    /// Total number of outbound links found on successful pages
    pub total_links: u64,

    /// Mean fetch time over pages that were actually fetched (milliseconds)
    pub avg_fetch_ms: f64,

    /// Page count per status kind
    pub pages_by_status: BTreeMap<String, u64>,

    /// Page count per depth
    pub depth_breakdown: BTreeMap<u32, u64>,
}

impl CrawlStatistics {
    /// Aggregates statistics from in-memory results
    pub fn from_results(results: &[CrawlResult]) -> Self {
        let mut stats = Self::default();
        let mut domains = HashSet::new();
        let mut fetch_ms_total = 0u64;
        let mut fetched = 0u64;

        for result in results {
            stats.total_pages += 1;
            *stats
                .pages_by_status
                .entry(result.status.kind().to_string())
                .or_insert(0) += 1;
            *stats.depth_breakdown.entry(result.depth).or_insert(0) += 1;

            if let Some(domain) = Url::parse(&result.url).ok().as_ref().and_then(extract_domain) {
                domains.insert(domain);
            }

            match &result.status {
                PageStatus::Blocked => stats.blocked_pages += 1,
                status if status.is_success() => {
                    stats.successful_pages += 1;
                    stats.total_links += result.outbound_links.len() as u64;
                    if result.is_duplicate {
                        stats.duplicate_pages += 1;
                    }
                }
                _ => stats.failed_pages += 1,
            }

            if result.status != PageStatus::Blocked {
                fetch_ms_total += result.fetch_duration_ms;
                fetched += 1;
            }
        }

        stats.unique_domains = domains.len() as u64;
        if fetched > 0 {
            stats.avg_fetch_ms = fetch_ms_total as f64 / fetched as f64;
        }
        stats
    }

    /// Percentage of recorded pages that were fetched successfully
    pub fn success_rate(&self) -> f64 {
        if self.total_pages == 0 {
            return 0.0;
        }
        (self.successful_pages as f64 / self.total_pages as f64) * 100.0
    }

    /// Mean number of outbound links per successful page
    pub fn avg_links_per_page(&self) -> f64 {
        if self.successful_pages == 0 {
            return 0.0;
        }
        self.total_links as f64 / self.successful_pages as f64
    }
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Overview:");
    println!("  Total pages recorded: {}", stats.total_pages);
    println!("  Unique domains: {}", stats.unique_domains);
    println!("  Total links found: {}", stats.total_links);
    println!("  Average links per page: {:.1}", stats.avg_links_per_page());
    println!("  Average fetch time: {:.0} ms", stats.avg_fetch_ms);
    println!("  Duplicate pages: {}", stats.duplicate_pages);
    println!();

    println!("Pages by Status:");
    let mut status_counts: Vec<_> = stats.pages_by_status.iter().collect();
    status_counts.sort_by(|a, b| b.1.cmp(a.1));

    for (status, count) in status_counts {
        let percentage = if stats.total_pages > 0 {
            (*count as f64 / stats.total_pages as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", status, count, percentage);
    }
    println!();

    if !stats.depth_breakdown.is_empty() {
        println!("Pages by Depth:");
        for (depth, count) in &stats.depth_breakdown {
            println!("  {}: {}", depth, count);
        }
        println!();
    }

    println!(
        "Success Rate: {:.1}% ({} / {} pages successfully fetched)",
        stats.success_rate(),
        stats.successful_pages,
        stats.total_pages
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::FrontierEntry;
    use crate::state::SessionId;

    fn result(path: &str, depth: u32, status: PageStatus, links: usize, ms: u64) -> CrawlResult {
        let url = Url::parse(&format!("https://example.com{}", path)).unwrap();
        let mut result = CrawlResult::failed(
            SessionId::new(),
            &FrontierEntry::new(url, depth, None),
            status,
            1,
            ms,
        );
        result.outbound_links = (0..links)
            .map(|i| format!("https://example.com/link{}", i))
            .collect();
        result
    }

    #[test]
    fn test_statistics_from_results() {
        let mut duplicate = result("/copy", 1, PageStatus::Ok(200), 2, 30);
        duplicate.is_duplicate = true;

        let results = vec![
            result("/", 0, PageStatus::Ok(200), 4, 10),
            duplicate,
            result("/missing", 1, PageStatus::HttpError(404), 0, 20),
            result("/private", 1, PageStatus::Blocked, 0, 0),
        ];
        let stats = CrawlStatistics::from_results(&results);

        assert_eq!(stats.total_pages, 4);
        assert_eq!(stats.successful_pages, 2);
        assert_eq!(stats.failed_pages, 1);
        assert_eq!(stats.blocked_pages, 1);
        assert_eq!(stats.duplicate_pages, 1);
        assert_eq!(stats.total_links, 6);
        assert_eq!(stats.unique_domains, 1);
        assert!((stats.avg_fetch_ms - 20.0).abs() < 1e-9);
        assert!((stats.avg_links_per_page() - 3.0).abs() < 1e-9);
        assert!((stats.success_rate() - 50.0).abs() < 1e-9);
        assert_eq!(stats.pages_by_status.get("ok"), Some(&2));
        assert_eq!(stats.depth_breakdown.get(&1), Some(&3));
    }

    #[test]
    fn test_empty_statistics() {
        let stats = CrawlStatistics::from_results(&[]);
        assert_eq!(stats.success_rate(), 0.0);
        assert_eq!(stats.avg_links_per_page(), 0.0);
    }
}
