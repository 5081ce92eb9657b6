//! Robots.txt rules
//!
//! Allow/Disallow matching is delegated to the robotstxt crate (Google's
//! matcher port). `Crawl-delay` is not part of that matcher, so it is read
//! here with a small group-aware scan.

use robotstxt::DefaultMatcher;
use std::time::Duration;

/// Upper bound on an honoured `Crawl-delay`
const MAX_CRAWL_DELAY: Duration = Duration::from_secs(60);

/// Parsed robots.txt rules for one domain
#[derive(Debug, Clone, Default)]
pub struct ParsedRobots {
    /// Raw robots.txt body; empty means everything is allowed
    content: String,
}

impl ParsedRobots {
    /// Wraps the raw robots.txt body
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }

    /// Rules that allow every path
    ///
    /// Used when robots.txt is missing or could not be fetched.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Returns true if no rules were loaded
    pub fn is_permissive(&self) -> bool {
        self.content.trim().is_empty()
    }

    /// Checks if a URL is allowed for the given user agent product token
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute URL (or path) to check
    /// * `user_agent` - Product token, e.g. "KumoCrawl"
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.is_permissive() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }

    /// Returns the `Crawl-delay` that applies to `user_agent`
    ///
    /// A group naming the agent wins over the `*` group. The value is capped
    /// at one minute.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        if self.is_permissive() {
            return None;
        }

        let agent = user_agent.to_lowercase();
        let mut group: Vec<String> = Vec::new();
        let mut in_agent_lines = false;
        let mut specific: Option<f64> = None;
        let mut wildcard: Option<f64> = None;

        for line in self.content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            if key == "user-agent" {
                // Consecutive user-agent lines share one group
                if !in_agent_lines {
                    group.clear();
                }
                group.push(value.to_lowercase());
                in_agent_lines = true;
                continue;
            }
            in_agent_lines = false;

            if key != "crawl-delay" {
                continue;
            }
            let Ok(seconds) = value.parse::<f64>() else {
                continue;
            };
            if !seconds.is_finite() || seconds < 0.0 {
                continue;
            }

            if group.iter().any(|ua| ua != "*" && agent.contains(ua.as_str())) {
                specific = Some(seconds);
            } else if group.iter().any(|ua| ua == "*") {
                wildcard = Some(seconds);
            }
        }

        specific
            .or(wildcard)
            .map(|s| Duration::from_secs_f64(s).min(MAX_CRAWL_DELAY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENT: &str = "KumoCrawl";

    #[test]
    fn test_allow_all() {
        let robots = ParsedRobots::allow_all();
        assert!(robots.is_permissive());
        assert!(robots.is_allowed("https://example.com/admin", AGENT));
    }

    #[test]
    fn test_disallow_prefix() {
        let robots = ParsedRobots::from_content("User-agent: *\nDisallow: /admin");
        assert!(robots.is_allowed("https://example.com/", AGENT));
        assert!(robots.is_allowed("https://example.com/page", AGENT));
        assert!(!robots.is_allowed("https://example.com/admin", AGENT));
        assert!(!robots.is_allowed("https://example.com/admin/users", AGENT));
    }

    #[test]
    fn test_allow_overrides_longer_match() {
        let robots =
            ParsedRobots::from_content("User-agent: *\nDisallow: /private\nAllow: /private/public");
        assert!(!robots.is_allowed("https://example.com/private", AGENT));
        assert!(robots.is_allowed("https://example.com/private/public", AGENT));
    }

    #[test]
    fn test_agent_specific_group() {
        let robots =
            ParsedRobots::from_content("User-agent: KumoCrawl\nDisallow: /\n\nUser-agent: *\nAllow: /");
        assert!(!robots.is_allowed("https://example.com/page", AGENT));
        assert!(robots.is_allowed("https://example.com/page", "OtherBot"));
    }

    #[test]
    fn test_garbage_is_permissive() {
        let robots = ParsedRobots::from_content("This is not valid robots.txt {{{");
        assert!(robots.is_allowed("https://example.com/any/path", AGENT));
    }

    #[test]
    fn test_crawl_delay_wildcard() {
        let robots = ParsedRobots::from_content("User-agent: *\nCrawl-delay: 10\nDisallow: /admin");
        assert_eq!(robots.crawl_delay(AGENT), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_crawl_delay_specific_beats_wildcard() {
        let robots = ParsedRobots::from_content(
            "User-agent: *\nCrawl-delay: 10\n\nUser-agent: kumocrawl\nDisallow: /x\nCrawl-delay: 2.5",
        );
        assert_eq!(robots.crawl_delay(AGENT), Some(Duration::from_millis(2500)));
        assert_eq!(robots.crawl_delay("OtherBot"), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_crawl_delay_shared_group() {
        let robots = ParsedRobots::from_content("User-agent: BotA\nUser-agent: BotB\nCrawl-delay: 3");
        assert_eq!(robots.crawl_delay("BotB"), Some(Duration::from_secs(3)));
        assert_eq!(robots.crawl_delay("BotC"), None);
    }

    #[test]
    fn test_crawl_delay_capped_and_invalid() {
        let robots = ParsedRobots::from_content("User-agent: *\nCrawl-delay: 3600");
        assert_eq!(robots.crawl_delay(AGENT), Some(MAX_CRAWL_DELAY));

        let robots = ParsedRobots::from_content("User-agent: *\nCrawl-delay: soon");
        assert_eq!(robots.crawl_delay(AGENT), None);
    }
}
