//! Per-domain politeness gate
//!
//! The gate is the single place where requests to a domain are granted. A
//! grant and the `last_request_at` stamp happen under one lock, so when many
//! workers race for the same domain exactly one of them wins per delay window.

use crate::crawler::clock::Clock;
use crate::robots::ParsedRobots;
use crate::state::DomainState;
use crate::url::extract_domain;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// How long to hold off a domain whose robots.txt is still being fetched
const ROBOTS_PENDING_WAIT: Duration = Duration::from_millis(50);

/// Outcome of [`PolitenessGate::check_and_reserve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The request may go now; the domain's window has been reserved
    Allowed,
    /// Try again after this long
    Deferred(Duration),
    /// Robots rules disallow the path
    Blocked,
}

#[derive(Debug, Default)]
struct GateState {
    domains: HashMap<String, DomainState>,
    robots_loading: HashSet<String>,
}

/// Per-domain rate limiter and robots policy
#[derive(Debug)]
pub struct PolitenessGate {
    state: Mutex<GateState>,
    clock: Arc<dyn Clock>,
    delay_min: Duration,
    delay_max: Duration,
    /// Product token matched against robots.txt groups
    user_agent: String,
}

impl PolitenessGate {
    /// Creates a gate
    ///
    /// # Arguments
    ///
    /// * `delay_range` - Bounds of the randomized per-domain delay
    /// * `user_agent` - Robots product token (e.g. "KumoCrawl")
    /// * `clock` - Time source
    pub fn new(
        delay_range: (Duration, Duration),
        user_agent: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (delay_min, delay_max) = delay_range;
        Self {
            state: Mutex::new(GateState::default()),
            clock,
            delay_min,
            delay_max: delay_max.max(delay_min),
            user_agent: user_agent.into(),
        }
    }

    /// Atomically checks robots rules and the domain delay, reserving the
    /// domain on success
    pub fn check_and_reserve(&self, url: &Url) -> Reservation {
        let Some(domain) = extract_domain(url) else {
            return Reservation::Blocked;
        };

        let now = self.clock.now();
        let mut state = self.state.lock();

        if state.robots_loading.contains(&domain) {
            return Reservation::Deferred(ROBOTS_PENDING_WAIT);
        }

        let entry = state
            .domains
            .entry(domain.clone())
            .or_insert_with(|| DomainState::new(domain));

        if !entry.is_allowed(url.as_str(), &self.user_agent) {
            return Reservation::Blocked;
        }

        if let Some(wait) = entry.time_until_next_request(now) {
            return Reservation::Deferred(wait);
        }

        let mut next_delay = self.draw_delay();
        if let Some(crawl_delay) = entry.crawl_delay(&self.user_agent) {
            next_delay = next_delay.max(crawl_delay);
        }
        entry.record_request(now, next_delay);

        Reservation::Allowed
    }

    /// Claims the robots.txt fetch for a domain
    ///
    /// Returns true for exactly one caller per domain; until
    /// [`install_robots`](Self::install_robots) runs, reservations for the
    /// domain are deferred. The robots.txt request is a request to the
    /// domain like any other, so a successful claim also opens the domain's
    /// delay window.
    pub fn claim_robots(&self, domain: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if state.robots_loading.contains(domain)
            || state.domains.get(domain).is_some_and(|d| d.has_robots())
        {
            return false;
        }
        state.robots_loading.insert(domain.to_string());

        let next_delay = self.draw_delay();
        state
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainState::new(domain))
            .record_request(now, next_delay);
        true
    }

    /// Returns true if robots rules for the domain have not been loaded or claimed
    pub fn needs_robots(&self, domain: &str) -> bool {
        let state = self.state.lock();
        !state.robots_loading.contains(domain)
            && !state.domains.get(domain).is_some_and(|d| d.has_robots())
    }

    /// Installs robots rules for a domain and releases its claim
    pub fn install_robots(&self, domain: &str, robots: ParsedRobots) {
        let mut state = self.state.lock();
        state.robots_loading.remove(domain);
        state
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainState::new(domain))
            .install_robots(robots);
    }

    /// Slows a domain down after it answered HTTP 429
    pub fn mark_rate_limited(&self, domain: &str) {
        let mut state = self.state.lock();
        let entry = state
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainState::new(domain));
        entry.mark_rate_limited();
        tracing::debug!(
            "Domain {} rate limited, backoff now {:?}",
            domain,
            entry.backoff
        );
    }

    /// Copy of a domain's state
    pub fn domain_state(&self, domain: &str) -> Option<DomainState> {
        self.state.lock().domains.get(domain).cloned()
    }

    fn draw_delay(&self) -> Duration {
        if self.delay_min == self.delay_max {
            return self.delay_min;
        }
        let min = self.delay_min.as_millis() as u64;
        let max = self.delay_max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::clock::MockClock;

    fn gate(min_ms: u64, max_ms: u64) -> (PolitenessGate, Arc<MockClock>) {
        let clock = Arc::new(MockClock::new());
        let gate = PolitenessGate::new(
            (Duration::from_millis(min_ms), Duration::from_millis(max_ms)),
            "KumoCrawl",
            clock.clone(),
        );
        (gate, clock)
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_first_request_allowed_second_deferred() {
        let (gate, clock) = gate(1000, 1000);
        let page = url("https://example.com/a");

        assert_eq!(gate.check_and_reserve(&page), Reservation::Allowed);
        assert_eq!(
            gate.check_and_reserve(&page),
            Reservation::Deferred(Duration::from_millis(1000))
        );

        clock.advance(Duration::from_millis(400));
        assert_eq!(
            gate.check_and_reserve(&url("https://example.com/b")),
            Reservation::Deferred(Duration::from_millis(600))
        );

        clock.advance(Duration::from_millis(600));
        assert_eq!(gate.check_and_reserve(&page), Reservation::Allowed);
    }

    #[test]
    fn test_domains_are_independent() {
        let (gate, _) = gate(1000, 1000);
        assert_eq!(
            gate.check_and_reserve(&url("https://a.example/")),
            Reservation::Allowed
        );
        assert_eq!(
            gate.check_and_reserve(&url("https://b.example/")),
            Reservation::Allowed
        );
    }

    #[test]
    fn test_randomized_delay_within_range() {
        let (gate, clock) = gate(100, 300);
        let page = url("https://example.com/");

        for _ in 0..20 {
            assert_eq!(gate.check_and_reserve(&page), Reservation::Allowed);
            let delay = gate.domain_state("example.com").unwrap().next_delay;
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(300));
            clock.advance(Duration::from_millis(300));
        }
    }

    #[test]
    fn test_robots_block_and_crawl_delay() {
        let (gate, clock) = gate(0, 0);
        assert!(gate.needs_robots("example.com"));
        assert!(gate.claim_robots("example.com"));
        assert!(!gate.claim_robots("example.com"));

        // Held back while the rules are loading
        assert_eq!(
            gate.check_and_reserve(&url("https://example.com/")),
            Reservation::Deferred(ROBOTS_PENDING_WAIT)
        );

        gate.install_robots(
            "example.com",
            ParsedRobots::from_content("User-agent: *\nDisallow: /private\nCrawl-delay: 2"),
        );
        assert!(!gate.needs_robots("example.com"));

        assert_eq!(
            gate.check_and_reserve(&url("https://example.com/private/x")),
            Reservation::Blocked
        );
        assert_eq!(
            gate.check_and_reserve(&url("https://example.com/")),
            Reservation::Allowed
        );
        assert_eq!(
            gate.check_and_reserve(&url("https://example.com/next")),
            Reservation::Deferred(Duration::from_secs(2))
        );

        clock.advance(Duration::from_secs(2));
        assert_eq!(
            gate.check_and_reserve(&url("https://example.com/next")),
            Reservation::Allowed
        );
    }

    #[test]
    fn test_robots_fetch_opens_delay_window() {
        let (gate, clock) = gate(500, 500);
        assert!(gate.claim_robots("example.com"));
        gate.install_robots("example.com", ParsedRobots::allow_all());

        assert_eq!(
            gate.check_and_reserve(&url("https://example.com/")),
            Reservation::Deferred(Duration::from_millis(500))
        );
        assert_eq!(gate.domain_state("example.com").unwrap().request_count, 1);

        clock.advance(Duration::from_millis(500));
        assert_eq!(
            gate.check_and_reserve(&url("https://example.com/")),
            Reservation::Allowed
        );
    }

    #[test]
    fn test_rate_limited_domain_backs_off() {
        let (gate, _) = gate(0, 0);
        let page = url("https://example.com/");

        assert_eq!(gate.check_and_reserve(&page), Reservation::Allowed);
        gate.mark_rate_limited("example.com");
        assert_eq!(
            gate.check_and_reserve(&page),
            Reservation::Deferred(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_concurrent_grants_respect_min_delay() {
        let clock = Arc::new(MockClock::new());
        let gate = Arc::new(PolitenessGate::new(
            (Duration::from_millis(200), Duration::from_millis(400)),
            "KumoCrawl",
            clock.clone(),
        ));
        let grants = Arc::new(Mutex::new(Vec::new()));
        // Workers read the clock and reserve under a read guard, so time
        // cannot move between the two
        let tick = Arc::new(parking_lot::RwLock::new(()));
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let clock = clock.clone();
                let grants = grants.clone();
                let tick = tick.clone();
                let stop = stop.clone();
                std::thread::spawn(move || {
                    let page = Url::parse("https://example.com/").unwrap();
                    while !stop.load(std::sync::atomic::Ordering::SeqCst) {
                        {
                            let _guard = tick.read();
                            let at = clock.elapsed();
                            if gate.check_and_reserve(&page) == Reservation::Allowed {
                                grants.lock().push(at);
                            }
                        }
                        std::thread::yield_now();
                    }
                })
            })
            .collect();

        for _ in 0..200 {
            {
                let _guard = tick.write();
                clock.advance(Duration::from_millis(25));
            }
            std::thread::sleep(Duration::from_micros(200));
        }
        stop.store(true, std::sync::atomic::Ordering::SeqCst);
        for worker in workers {
            worker.join().unwrap();
        }

        let mut grants = grants.lock().clone();
        grants.sort();
        assert!(grants.len() >= 2);
        for pair in grants.windows(2) {
            assert!(
                pair[1] - pair[0] >= Duration::from_millis(200),
                "grants {:?} and {:?} too close",
                pair[0],
                pair[1]
            );
        }
    }
}
