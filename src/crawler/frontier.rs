//! Crawl frontier
//!
//! This module handles:
//! - Priority queue management for URLs to crawl (highest priority first,
//!   FIFO among equal priorities)
//! - Admission control: visited set, depth cap and page budget
//! - Deferred entries waiting out a politeness delay
//! - Telling "empty right now" apart from "permanently drained"

use crate::crawler::clock::Clock;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// A URL waiting to be fetched
#[derive(Debug, Clone)]
pub struct FrontierEntry {
    /// Normalized URL
    pub url: Url,
    /// Link distance from the base URL
    pub depth: u32,
    /// Page the link was found on (None for the seed)
    pub discovered_from: Option<Url>,
    pub enqueued_at: Instant,
    /// Higher values are popped first
    pub priority: f64,
}

impl FrontierEntry {
    /// Creates an entry with the default breadth-first priority (`-depth`)
    pub fn new(url: Url, depth: u32, discovered_from: Option<Url>) -> Self {
        Self {
            url,
            depth,
            discovered_from,
            enqueued_at: Instant::now(),
            priority: default_priority(depth),
        }
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }
}

/// Breadth-first priority: shallower pages first
pub fn default_priority(depth: u32) -> f64 {
    -f64::from(depth)
}

/// Outcome of [`Frontier::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The entry was queued
    Admitted,
    /// A pending entry for the same URL was moved to the shallower depth
    DepthLowered,
    /// The URL is already pending, in flight or visited
    AlreadyKnown,
    /// The entry is deeper than the session's max depth
    TooDeep,
    /// Crawled, in-flight and pending pages already fill the page budget
    PageBudgetExhausted,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted | Self::DepthLowered)
    }
}

/// Outcome of [`Frontier::pop`]
#[derive(Debug)]
pub enum Next {
    /// An entry is ready; it is now in flight
    Ready(FrontierEntry),
    /// Only deferred entries remain; the earliest is ready after this long
    Wait(Duration),
    /// Nothing queued now, but in-flight fetches may still push more
    Idle,
    /// Nothing queued and nothing in flight
    Drained,
}

/// Counters describing the frontier at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontierStats {
    pub pending: usize,
    pub in_flight: usize,
    pub crawled: u32,
    /// Distinct URLs ever admitted
    pub known: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Known {
    /// Queued or deferred; `seq` identifies the live heap item
    Pending { depth: u32, seq: u64 },
    /// Popped; `seq` is kept so a deferral preserves queue order
    InFlight { seq: u64 },
    Visited,
}

#[derive(Debug)]
struct Queued {
    seq: u64,
    entry: FrontierEntry,
}

// Max-heap order: higher priority first, then lower sequence number first
impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entry
            .priority
            .total_cmp(&other.entry.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

#[derive(Debug)]
struct Deferred {
    ready_at: Instant,
    item: Queued,
}

#[derive(Debug, Default)]
struct Inner {
    heap: BinaryHeap<Queued>,
    deferred: Vec<Deferred>,
    known: HashMap<String, Known>,
    next_seq: u64,
    pending: usize,
    in_flight: usize,
    crawled: u32,
}

impl Inner {
    fn is_live(&self, item: &Queued) -> bool {
        matches!(
            self.known.get(item.entry.url.as_str()),
            Some(Known::Pending { seq, .. }) if *seq == item.seq
        )
    }

    fn release_due(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.deferred.len() {
            if self.deferred[i].ready_at <= now {
                let due = self.deferred.swap_remove(i);
                self.heap.push(due.item);
            } else {
                i += 1;
            }
        }
    }
}

/// Shared priority queue of pending URLs with admission control
///
/// All state sits behind one lock; no method holds it across an await.
#[derive(Debug)]
pub struct Frontier {
    inner: Mutex<Inner>,
    max_depth: u32,
    max_pages: u32,
    clock: Arc<dyn Clock>,
}

impl Frontier {
    /// Creates an empty frontier
    ///
    /// # Arguments
    ///
    /// * `max_depth` - Entries deeper than this are rejected
    /// * `max_pages` - Budget shared by crawled, in-flight and pending pages
    /// * `clock` - Time source used for deferrals
    pub fn new(max_depth: u32, max_pages: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_depth,
            max_pages,
            clock,
        }
    }

    /// Offers an entry to the frontier
    pub fn push(&self, mut entry: FrontierEntry) -> Admission {
        if entry.depth > self.max_depth {
            return Admission::TooDeep;
        }

        let mut inner = self.inner.lock();
        let key = entry.url.as_str().to_string();

        match inner.known.get(&key).copied() {
            Some(Known::Pending { depth, .. }) if entry.depth < depth => {
                // Supersede the queued item; the old one is skipped as stale
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.known.insert(key, Known::Pending { depth: entry.depth, seq });
                entry.enqueued_at = self.clock.now();
                inner.heap.push(Queued { seq, entry });
                return Admission::DepthLowered;
            }
            Some(_) => return Admission::AlreadyKnown,
            None => {}
        }

        let used = inner.crawled as usize + inner.in_flight + inner.pending;
        if used >= self.max_pages as usize {
            return Admission::PageBudgetExhausted;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.known.insert(key, Known::Pending { depth: entry.depth, seq });
        inner.pending += 1;
        entry.enqueued_at = self.clock.now();
        inner.heap.push(Queued { seq, entry });

        Admission::Admitted
    }

    /// Takes the highest-priority ready entry
    pub fn pop(&self) -> Next {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.release_due(now);

        while let Some(item) = inner.heap.pop() {
            if !inner.is_live(&item) {
                continue;
            }
            inner.known.insert(
                item.entry.url.as_str().to_string(),
                Known::InFlight { seq: item.seq },
            );
            inner.pending -= 1;
            inner.in_flight += 1;
            return Next::Ready(item.entry);
        }

        if let Some(ready_at) = inner.deferred.iter().map(|d| d.ready_at).min() {
            return Next::Wait(ready_at.saturating_duration_since(now));
        }

        if inner.in_flight > 0 {
            Next::Idle
        } else {
            Next::Drained
        }
    }

    /// Puts a popped entry back, not to be handed out before `wait` elapses
    ///
    /// The entry keeps its place among equal priorities and does not touch
    /// the visited set.
    pub fn defer(&self, entry: FrontierEntry, wait: Duration) {
        let ready_at = self.clock.now() + wait;
        let mut inner = self.inner.lock();

        let key = entry.url.as_str().to_string();
        let seq = match inner.known.get(&key) {
            Some(Known::InFlight { seq }) => *seq,
            _ => {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                seq
            }
        };
        inner.known.insert(
            key,
            Known::Pending {
                depth: entry.depth,
                seq,
            },
        );
        inner.in_flight = inner.in_flight.saturating_sub(1);
        inner.pending += 1;
        inner.deferred.push(Deferred {
            ready_at,
            item: Queued { seq, entry },
        });
    }

    /// Finishes an in-flight entry
    ///
    /// `counted` marks a successful fetch that counts toward the page budget.
    pub fn complete(&self, url: &Url, counted: bool) {
        let mut inner = self.inner.lock();
        inner.known.insert(url.as_str().to_string(), Known::Visited);
        inner.in_flight = inner.in_flight.saturating_sub(1);
        if counted {
            inner.crawled += 1;
        }
    }

    /// Number of successfully crawled pages
    pub fn pages_crawled(&self) -> u32 {
        self.inner.lock().crawled
    }

    /// Returns true if nothing is queued and nothing is in flight
    pub fn is_drained(&self) -> bool {
        let inner = self.inner.lock();
        inner.pending == 0 && inner.in_flight == 0
    }

    pub fn stats(&self) -> FrontierStats {
        let inner = self.inner.lock();
        FrontierStats {
            pending: inner.pending,
            in_flight: inner.in_flight,
            crawled: inner.crawled,
            known: inner.known.len(),
        }
    }
}
