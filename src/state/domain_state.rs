use crate::robots::ParsedRobots;
use std::time::{Duration, Instant};

/// Cap on the delay a domain can be pushed to by rate limiting
pub const MAX_RATE_LIMIT_DELAY: Duration = Duration::from_secs(60);

/// Smallest delay applied after a domain answers 429
const MIN_RATE_LIMIT_DELAY: Duration = Duration::from_secs(1);

/// Tracks the politeness state of one domain
///
/// Owned by the politeness gate and only mutated while its lock is held.
#[derive(Debug, Clone)]
pub struct DomainState {
    pub domain: String,

    /// When the last request to this domain was granted
    pub last_request_at: Option<Instant>,

    /// Gap required after `last_request_at` before the next grant
    pub next_delay: Duration,

    /// Robots rules, once loaded
    pub robots: Option<ParsedRobots>,

    /// Number of requests granted to this domain
    pub request_count: u32,

    /// Number of 429 responses seen
    pub rate_limited_hits: u32,

    /// Floor raised by rate limiting; never lowered during a session
    pub backoff: Duration,
}

impl DomainState {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            last_request_at: None,
            next_delay: Duration::ZERO,
            robots: None,
            request_count: 0,
            rate_limited_hits: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Time left before a request may be granted, or `None` if one may go now
    pub fn time_until_next_request(&self, now: Instant) -> Option<Duration> {
        let last = self.last_request_at?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed < self.next_delay {
            Some(self.next_delay - elapsed)
        } else {
            None
        }
    }

    /// Records a granted request and the gap the following one must respect
    pub fn record_request(&mut self, now: Instant, next_delay: Duration) {
        self.request_count += 1;
        self.last_request_at = Some(now);
        self.next_delay = next_delay.max(self.backoff);
    }

    /// Doubles the domain's backoff after HTTP 429
    pub fn mark_rate_limited(&mut self) {
        self.rate_limited_hits += 1;
        self.backoff = (self.backoff * 2)
            .max(MIN_RATE_LIMIT_DELAY)
            .min(MAX_RATE_LIMIT_DELAY);
        self.next_delay = self.next_delay.max(self.backoff);
    }

    /// Checks the loaded robots rules; domains without rules allow everything
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        self.robots
            .as_ref()
            .map_or(true, |r| r.is_allowed(url, user_agent))
    }

    pub fn has_robots(&self) -> bool {
        self.robots.is_some()
    }

    pub fn install_robots(&mut self, robots: ParsedRobots) {
        self.robots = Some(robots);
    }

    /// Robots `Crawl-delay` for the agent, if any
    pub fn crawl_delay(&self, user_agent: &str) -> Option<Duration> {
        self.robots.as_ref().and_then(|r| r.crawl_delay(user_agent))
    }
}
