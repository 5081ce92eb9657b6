//! Crawl engine - the worker pool that drives a session
//!
//! This module contains the main crawl loop that coordinates all aspects of
//! a session, including:
//! - Seeding the frontier and running a fixed pool of workers
//! - Robots loading, politeness reservations and fetch retries
//! - Extraction, deduplication and feeding links back into the frontier
//! - Streaming results to the storage sink with backpressure
//! - Draining, cancellation and the final session snapshot

use crate::config::{validate_crawler_config, CrawlerConfig};
use crate::crawler::clock::Clock;
use crate::crawler::dedup::{ContentFingerprint, DedupIndex};
use crate::crawler::fetcher::{FetchError, FetchedPage, Fetcher};
use crate::crawler::frontier::{Frontier, FrontierEntry, Next};
use crate::crawler::parser::{ExtractedPage, Extractor};
use crate::crawler::politeness::{PolitenessGate, Reservation};
use crate::crawler::scorer::{ParentContext, Scorer};
use crate::crawler::{CrawlResult, PageStatus};
use crate::robots::{fetch_robots, ParsedRobots};
use crate::state::{CrawlSession, SessionState};
use crate::storage::{ResultSink, StorageError};
use crate::url::{extract_domain, is_excluded_resource, normalize_url, ScopePolicy};
use crate::KumoError;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;

/// How long an idle worker sleeps before polling the frontier again
const IDLE_POLL: Duration = Duration::from_millis(25);

/// Upper bound on a single wait for a deferred entry
const MAX_WAIT: Duration = Duration::from_secs(1);

/// Pages between progress log lines
const PROGRESS_INTERVAL: u32 = 10;

/// Collaborators a session runs with
#[derive(Clone)]
pub struct CrawlParts {
    pub fetcher: Arc<dyn Fetcher>,
    pub extractor: Arc<dyn Extractor>,
    pub clock: Arc<dyn Clock>,
    pub scorer: Scorer,
    /// Product token matched against robots.txt groups
    pub robots_agent: String,
}

/// State shared by all workers of one session
struct Shared {
    config: CrawlerConfig,
    session: Arc<Mutex<CrawlSession>>,
    frontier: Frontier,
    gate: PolitenessGate,
    dedup: DedupIndex,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    scorer: Scorer,
    scope: ScopePolicy,
    cancel: CancellationToken,
    started: Instant,
}

/// Runs one crawl session to completion
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl Coordinator {
    /// Creates a coordinator and seeds its frontier
    ///
    /// # Arguments
    ///
    /// * `config` - Crawl bounds and politeness settings
    /// * `session` - Session record the engine keeps current
    /// * `parts` - Fetcher, extractor, clock and scorer
    /// * `cancel` - Token that aborts the session when tripped
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to run, session still `Pending`
    /// * `Err(KumoError)` - The configuration was rejected
    pub fn new(
        config: CrawlerConfig,
        session: Arc<Mutex<CrawlSession>>,
        parts: CrawlParts,
        cancel: CancellationToken,
    ) -> Result<Self, KumoError> {
        validate_crawler_config(&config)?;
        let scope = ScopePolicy::from_config(&config)?;
        let seed = normalize_url(&config.base_url)?;

        let frontier = Frontier::new(config.max_depth, config.max_pages, parts.clock.clone());
        frontier.push(FrontierEntry::new(seed, 0, None));

        let gate = PolitenessGate::new(config.delay_range(), parts.robots_agent, parts.clock);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                session,
                frontier,
                gate,
                dedup: DedupIndex::new(),
                fetcher: parts.fetcher,
                extractor: parts.extractor,
                scorer: parts.scorer,
                scope,
                cancel,
                started: Instant::now(),
            }),
        })
    }

    /// Current session snapshot
    pub fn session(&self) -> CrawlSession {
        self.shared.session.lock().clone()
    }

    /// Runs the session until it completes or aborts
    ///
    /// Every result is written through `sink` from a blocking task. The sink
    /// sees the session once when it starts and once with its final state.
    pub async fn run(self, sink: Box<dyn ResultSink>) -> CrawlSession {
        let shared = self.shared;
        let config = &shared.config;

        let start_snapshot = {
            let mut session = shared.session.lock();
            session.state = SessionState::Running;
            session.clone()
        };
        tracing::info!(
            "Starting session {} at {} (depth {}, {} pages, {} workers)",
            start_snapshot.id,
            config.base_url,
            config.max_depth,
            config.max_pages,
            config.worker_count
        );

        let (tx, rx) = mpsc::channel(config.result_buffer);
        let cancel = shared.cancel.clone();
        let sink_task =
            tokio::task::spawn_blocking(move || drain_results(sink, rx, start_snapshot, cancel));

        let mut workers = JoinSet::new();
        for worker_id in 0..config.worker_count {
            workers.spawn(worker_loop(shared.clone(), tx.clone(), worker_id));
        }
        drop(tx);

        tokio::select! {
            _ = join_workers(&mut workers) => {}
            _ = shared.cancel.cancelled() => {}
        }

        if !workers.is_empty() {
            let grace = config.grace_period();
            tracing::info!("Cancellation requested, giving workers {:?} to finish", grace);
            if tokio::time::timeout(grace, join_workers(&mut workers))
                .await
                .is_err()
            {
                tracing::warn!("Grace period elapsed, aborting {} workers", workers.len());
                workers.abort_all();
                join_workers(&mut workers).await;
            }
        }

        let (sink, mut fatal) = match sink_task.await {
            Ok((sink, error)) => (Some(sink), error.map(|e| e.to_string())),
            Err(e) => (None, Some(format!("result sink task failed: {}", e))),
        };

        let final_snapshot = {
            let mut session = shared.session.lock();
            let state = if fatal.is_some() || shared.cancel.is_cancelled() {
                SessionState::Aborted
            } else {
                SessionState::Completed
            };
            session.finish(state, fatal.take());
            session.clone()
        };

        if let Some(sink) = sink {
            let snapshot = final_snapshot.clone();
            let recorded = tokio::task::spawn_blocking(move || finalize_sink(sink, &snapshot)).await;
            let failure = match recorded {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(e) => Some(format!("result sink task failed: {}", e)),
            };
            if let Some(error) = failure {
                tracing::error!("Failed to record final session state: {}", error);
                let mut session = shared.session.lock();
                session.finish(SessionState::Aborted, Some(error));
                return session.clone();
            }
        }

        let elapsed = shared.started.elapsed();
        tracing::info!(
            "Session {} {}: {} crawled, {} failed, {} blocked, {} duplicates in {:.1}s",
            final_snapshot.id,
            final_snapshot.state,
            final_snapshot.pages_crawled,
            final_snapshot.pages_failed,
            final_snapshot.pages_blocked,
            final_snapshot.duplicate_pages,
            elapsed.as_secs_f64()
        );

        final_snapshot
    }
}

async fn join_workers(workers: &mut JoinSet<()>) {
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            if !e.is_cancelled() {
                tracing::error!("Crawl worker failed: {}", e);
            }
        }
    }
}

/// Body of the blocking sink task
///
/// Returns the sink together with the error that stopped it, if any. On error
/// the session is cancelled and the receiver dropped, so workers stop sending.
fn drain_results(
    mut sink: Box<dyn ResultSink>,
    mut rx: mpsc::Receiver<CrawlResult>,
    start: CrawlSession,
    cancel: CancellationToken,
) -> (Box<dyn ResultSink>, Option<StorageError>) {
    if let Err(e) = sink.record_session(&start) {
        tracing::error!("Failed to record session {}: {}", start.id, e);
        cancel.cancel();
        return (sink, Some(e));
    }

    while let Some(result) = rx.blocking_recv() {
        if let Err(e) = sink.write(&result) {
            tracing::error!("Failed to store result for {}: {}", result.url, e);
            cancel.cancel();
            return (sink, Some(e));
        }
    }

    (sink, None)
}

fn finalize_sink(mut sink: Box<dyn ResultSink>, session: &CrawlSession) -> Result<(), StorageError> {
    sink.record_session(session)?;
    sink.flush()
}

async fn worker_loop(shared: Arc<Shared>, results: mpsc::Sender<CrawlResult>, worker_id: u32) {
    tracing::debug!("Worker {} started", worker_id);

    loop {
        if shared.cancel.is_cancelled() {
            break;
        }
        if shared.budget_reached() {
            shared.begin_draining("page budget reached");
            break;
        }

        match shared.frontier.pop() {
            Next::Ready(entry) => {
                if !shared.process(entry, &results).await {
                    break;
                }
            }
            Next::Wait(wait) => shared.pause(wait.clamp(Duration::from_millis(1), MAX_WAIT)).await,
            Next::Idle => shared.pause(IDLE_POLL).await,
            Next::Drained => {
                shared.begin_draining("frontier drained");
                break;
            }
        }
    }

    tracing::debug!("Worker {} finished", worker_id);
}

/// How the last fetch attempt for an entry ended
struct Attempted {
    /// The response, kept only when its status is a success
    page: Option<FetchedPage>,
    status: PageStatus,
    attempts: u32,
    elapsed: Duration,
}

impl Shared {
    fn budget_reached(&self) -> bool {
        self.frontier.pages_crawled() >= self.config.max_pages
    }

    fn begin_draining(&self, reason: &str) {
        let mut session = self.session.lock();
        if session.state == SessionState::Running {
            session.state = SessionState::Draining;
            tracing::info!("Session {} draining: {}", session.id, reason);
        }
    }

    /// Sleeps for `wait`, returning early on cancellation
    async fn pause(&self, wait: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    /// Handles one popped entry
    ///
    /// Returns false when the worker should stop.
    async fn process(&self, entry: FrontierEntry, results: &mpsc::Sender<CrawlResult>) -> bool {
        tracing::debug!("Processing {} (depth {})", entry.url, entry.depth);

        if self.config.respect_robots {
            self.ensure_robots(&entry.url).await;
            if self.cancel.is_cancelled() {
                return false;
            }
        }

        match self.gate.check_and_reserve(&entry.url) {
            Reservation::Allowed => {}
            Reservation::Deferred(wait) => {
                self.frontier.defer(entry, wait);
                return true;
            }
            Reservation::Blocked => return self.emit_blocked(entry, 0, results).await,
        }

        let Some(attempted) = self.fetch_with_retries(&entry).await else {
            return false;
        };

        match attempted {
            Attempted {
                page: Some(page),
                status,
                attempts,
                elapsed,
            } => {
                self.handle_page(entry, page, status, attempts, elapsed, results)
                    .await
            }
            Attempted {
                status: PageStatus::Blocked,
                attempts,
                ..
            } => self.emit_blocked(entry, attempts, results).await,
            Attempted {
                status,
                attempts,
                elapsed,
                ..
            } => {
                tracing::debug!("Giving up on {} after {} attempts: {}", entry.url, attempts, status);
                let result = CrawlResult::failed(
                    self.session_id(),
                    &entry,
                    status,
                    attempts,
                    elapsed.as_millis() as u64,
                );
                self.session.lock().pages_failed += 1;
                self.frontier.complete(&entry.url, false);
                results.send(result).await.is_ok()
            }
        }
    }

    /// Loads robots rules the first time a domain is seen
    ///
    /// The fetch is bounded by the request timeout. Cancellation releases the
    /// domain with allow-all rules so no worker stays deferred on it.
    async fn ensure_robots(&self, url: &Url) {
        let Some(domain) = extract_domain(url) else {
            return;
        };
        if self.cancel.is_cancelled() || !self.gate.claim_robots(&domain) {
            return;
        }

        let robots = tokio::select! {
            robots = fetch_robots(&*self.fetcher, url, self.config.request_timeout()) => robots,
            _ = self.cancel.cancelled() => ParsedRobots::allow_all(),
        };
        self.gate.install_robots(&domain, robots);
    }

    /// Fetches an entry whose first reservation has been granted
    ///
    /// Retryable failures back off and go through the gate again. A
    /// cancellation during backoff ends the loop with the last failure.
    /// Returns None only if the session was cancelled before the first
    /// attempt.
    async fn fetch_with_retries(&self, entry: &FrontierEntry) -> Option<Attempted> {
        let timeout = self.config.request_timeout();
        let mut attempts = 0;

        loop {
            if self.cancel.is_cancelled() {
                return None;
            }

            attempts += 1;
            let started = Instant::now();
            let fetched = match tokio::time::timeout(timeout, self.fetcher.fetch(&entry.url, timeout)).await {
                Ok(fetched) => fetched,
                Err(_) => Err(FetchError::Timeout),
            };
            let elapsed = started.elapsed();

            let status = match &fetched {
                Ok(page) => PageStatus::from_http(page.status),
                Err(e) => PageStatus::from(e),
            };

            if status == PageStatus::HttpError(429) {
                if let Some(domain) = extract_domain(&entry.url) {
                    self.gate.mark_rate_limited(&domain);
                }
            }

            if status.is_success() || !status.is_retryable() || attempts > self.config.retry_count {
                return Some(Attempted {
                    page: fetched.ok().filter(|_| status.is_success()),
                    status,
                    attempts,
                    elapsed,
                });
            }

            tracing::debug!(
                "Attempt {} for {} failed ({}), retrying",
                attempts,
                entry.url,
                status
            );
            self.pause(self.config.retry_backoff(attempts)).await;

            match self.wait_for_slot(&entry.url).await {
                Some(Reservation::Allowed) => {}
                Some(_) => {
                    return Some(Attempted {
                        page: None,
                        status: PageStatus::Blocked,
                        attempts,
                        elapsed,
                    });
                }
                // Cancelled while backing off: the last failure is final
                None => {
                    return Some(Attempted {
                        page: None,
                        status,
                        attempts,
                        elapsed,
                    });
                }
            }
        }
    }

    /// Waits until the gate grants or blocks the URL; None on cancellation
    async fn wait_for_slot(&self, url: &Url) -> Option<Reservation> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            match self.gate.check_and_reserve(url) {
                Reservation::Deferred(wait) => self.pause(wait).await,
                granted_or_blocked => return Some(granted_or_blocked),
            }
        }
    }

    async fn handle_page(
        &self,
        entry: FrontierEntry,
        page: FetchedPage,
        status: PageStatus,
        attempts: u32,
        elapsed: Duration,
        results: &mpsc::Sender<CrawlResult>,
    ) -> bool {
        let extracted = if page.is_html() {
            match self.extractor.extract(&page.body, &page.final_url) {
                Ok(extracted) => extracted,
                Err(e) => {
                    tracing::warn!("Extraction failed for {}: {}", entry.url, e);
                    ExtractedPage::default()
                }
            }
        } else {
            tracing::debug!("Skipping extraction for {} ({})", entry.url, page.content_type);
            ExtractedPage::default()
        };

        let fingerprint = ContentFingerprint::of(&extracted.text);
        let dedup = self.dedup.record_if_new(&entry.url, fingerprint.as_ref());
        if dedup.is_duplicate_content {
            tracing::debug!("Duplicate content at {}", entry.url);
        }

        let links = normalized_links(&extracted.links);

        let mut text = extracted.text;
        if self.config.max_text_length > 0 {
            if let Some((cut, _)) = text.char_indices().nth(self.config.max_text_length) {
                text.truncate(cut);
            }
        }

        let parent = ParentContext {
            url: entry.url.clone(),
            depth: entry.depth,
            title: extracted.title.clone(),
        };

        let result = CrawlResult {
            session_id: self.session_id(),
            url: entry.url.to_string(),
            depth: entry.depth,
            discovered_from: entry.discovered_from.as_ref().map(|u| u.to_string()),
            title: extracted.title,
            extracted_text: text,
            outbound_links: links.iter().map(|u| u.to_string()).collect(),
            status,
            fetch_duration_ms: elapsed.as_millis() as u64,
            is_duplicate: dedup.is_duplicate_content,
            content_hash: fingerprint.map(|f| f.as_str().to_string()),
            attempts,
            timestamp: Utc::now(),
        };

        let crawled = {
            let mut session = self.session.lock();
            session.pages_crawled += 1;
            if dedup.is_duplicate_content {
                session.duplicate_pages += 1;
            }
            session.pages_crawled
        };
        if crawled % PROGRESS_INTERVAL == 0 {
            let stats = self.frontier.stats();
            tracing::info!(
                "Progress: {} pages crawled, {} pending, {} in flight, {:.2} pages/sec",
                crawled,
                stats.pending,
                stats.in_flight,
                f64::from(crawled) / self.started.elapsed().as_secs_f64().max(f64::EPSILON)
            );
        }

        if results.send(result).await.is_err() {
            return false;
        }

        // Children go in before this entry leaves in-flight, so no worker
        // sees the frontier drained in between
        let child_depth = entry.depth + 1;
        if child_depth <= self.config.max_depth {
            for link in links {
                if !self.scope.allows(&link) || is_excluded_resource(&link) {
                    continue;
                }
                let priority = self.scorer.priority(&link, child_depth, &parent);
                let child = FrontierEntry::new(link, child_depth, Some(entry.url.clone()))
                    .with_priority(priority);
                self.frontier.push(child);
            }
        }

        self.frontier.complete(&entry.url, true);
        true
    }

    async fn emit_blocked(
        &self,
        entry: FrontierEntry,
        attempts: u32,
        results: &mpsc::Sender<CrawlResult>,
    ) -> bool {
        tracing::debug!("Blocked by robots.txt: {}", entry.url);
        let result = CrawlResult::failed(self.session_id(), &entry, PageStatus::Blocked, attempts, 0);
        self.session.lock().pages_blocked += 1;
        self.frontier.complete(&entry.url, false);
        results.send(result).await.is_ok()
    }

    fn session_id(&self) -> crate::state::SessionId {
        self.session.lock().id
    }
}

/// Normalizes extracted links, dropping failures and repeats
fn normalized_links(links: &[String]) -> Vec<Url> {
    let mut seen = HashSet::new();
    links
        .iter()
        .filter_map(|link| normalize_url(link).ok())
        .filter(|url| seen.insert(url.as_str().to_string()))
        .collect()
}
