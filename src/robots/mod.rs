//! Robots.txt handling module
//!
//! Rules are fetched once per domain through the same [`Fetcher`] the crawl
//! uses and then handed to the politeness gate. Any failure to obtain them
//! degrades to allow-all.

mod parser;

pub use parser::ParsedRobots;

use crate::crawler::Fetcher;
use crate::url::robots_url;
use std::time::Duration;
use url::Url;

/// Fetches and parses robots.txt for the origin of `url`
///
/// # Returns
///
/// * Parsed rules when robots.txt answers 2xx
/// * [`ParsedRobots::allow_all`] for any other status, a transport error or
///   no answer within `timeout`
pub async fn fetch_robots(fetcher: &dyn Fetcher, url: &Url, timeout: Duration) -> ParsedRobots {
    let Some(location) = robots_url(url) else {
        return ParsedRobots::allow_all();
    };

    let Ok(fetched) = tokio::time::timeout(timeout, fetcher.fetch(&location, timeout)).await else {
        tracing::warn!("Timed out fetching {}, allowing all", location);
        return ParsedRobots::allow_all();
    };

    match fetched {
        Ok(page) if (200..300).contains(&page.status) => {
            tracing::debug!("Loaded robots.txt from {}", location);
            ParsedRobots::from_content(&page.body)
        }
        Ok(page) => {
            tracing::debug!(
                "robots.txt at {} returned {}, allowing all",
                location,
                page.status
            );
            ParsedRobots::allow_all()
        }
        Err(e) => {
            tracing::warn!("Failed to fetch {}: {}, allowing all", location, e);
            ParsedRobots::allow_all()
        }
    }
}
