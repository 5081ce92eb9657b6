//! Session control surface
//!
//! [`CrawlController`] starts sessions in the background and answers
//! `status`, `cancel` and `wait` for them. Sessions are tracked in an
//! injected [`SessionStore`] rather than a process-wide registry, and each
//! session's results go to a sink opened by an injected [`SinkProvider`].

use crate::config::{CrawlerConfig, UserAgentConfig};
use crate::crawler::clock::{Clock, SystemClock};
use crate::crawler::coordinator::{Coordinator, CrawlParts};
use crate::crawler::fetcher::{Fetcher, HttpFetcher};
use crate::crawler::parser::{Extractor, HtmlExtractor};
use crate::crawler::scorer::Scorer;
use crate::state::{CrawlSession, SessionId};
use crate::storage::{open_storage, MemorySink, ResultSink, StorageResult};
use crate::KumoError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Live view of a started session
#[derive(Clone)]
pub struct SessionHandle {
    session: Arc<Mutex<CrawlSession>>,
    cancel: CancellationToken,
    done: watch::Receiver<Option<CrawlSession>>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.session.lock().id
    }

    /// Current counters and state
    pub fn snapshot(&self) -> CrawlSession {
        self.session.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.done.borrow().is_some()
    }
}

/// Where the controller keeps its sessions
pub trait SessionStore: Send + Sync {
    fn create(&self, handle: SessionHandle);
    fn get(&self, id: &SessionId) -> Option<SessionHandle>;
    fn remove(&self, id: &SessionId) -> Option<SessionHandle>;
    fn ids(&self) -> Vec<SessionId>;
}

/// [`SessionStore`] backed by a map in memory
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, handle: SessionHandle) {
        self.sessions.lock().insert(handle.id(), handle);
    }

    fn get(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.lock().get(id).cloned()
    }

    fn remove(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.lock().remove(id)
    }

    fn ids(&self) -> Vec<SessionId> {
        self.sessions.lock().keys().copied().collect()
    }
}

/// Opens the result sink for a new session
pub trait SinkProvider: Send + Sync {
    fn open(&self, session: &CrawlSession) -> StorageResult<Box<dyn ResultSink>>;
}

/// Every session writes into clones of the same in-memory sink
impl SinkProvider for MemorySink {
    fn open(&self, _session: &CrawlSession) -> StorageResult<Box<dyn ResultSink>> {
        Ok(Box::new(self.clone()))
    }
}

/// Opens a connection to one SQLite database per session
#[derive(Debug, Clone)]
pub struct SqliteSinkProvider {
    path: PathBuf,
}

impl SqliteSinkProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SinkProvider for SqliteSinkProvider {
    fn open(&self, _session: &CrawlSession) -> StorageResult<Box<dyn ResultSink>> {
        Ok(Box::new(open_storage(&self.path)?))
    }
}

/// Per-start options beyond the crawler configuration
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub scorer: Scorer,
    /// Hash of the configuration file, recorded with the session
    pub config_hash: Option<String>,
}

/// Starts, observes and cancels crawl sessions
pub struct CrawlController {
    store: Arc<dyn SessionStore>,
    sinks: Arc<dyn SinkProvider>,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    clock: Arc<dyn Clock>,
    robots_agent: String,
}

impl CrawlController {
    /// Creates a controller with the default HTTP fetcher and HTML extractor
    ///
    /// # Arguments
    ///
    /// * `store` - Where sessions are tracked
    /// * `sinks` - Opens each session's result sink
    /// * `user_agent` - Identification sent with every request
    pub fn new(
        store: Arc<dyn SessionStore>,
        sinks: Arc<dyn SinkProvider>,
        user_agent: &UserAgentConfig,
    ) -> Result<Self, KumoError> {
        Ok(Self {
            store,
            sinks,
            fetcher: Arc::new(HttpFetcher::new(user_agent)?),
            extractor: Arc::new(HtmlExtractor),
            clock: Arc::new(SystemClock),
            robots_agent: user_agent.crawler_name.clone(),
        })
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Starts a breadth-first session
    ///
    /// Must be called from within a tokio runtime. A rejected configuration
    /// is reported here and never reaches `Running`.
    pub fn start(&self, config: CrawlerConfig) -> Result<SessionId, KumoError> {
        self.start_with(config, StartOptions::default())
    }

    /// Starts a session whose frontier is ordered by `scorer`
    pub fn start_with_scorer(
        &self,
        config: CrawlerConfig,
        scorer: Scorer,
    ) -> Result<SessionId, KumoError> {
        self.start_with(
            config,
            StartOptions {
                scorer,
                ..Default::default()
            },
        )
    }

    pub fn start_with(
        &self,
        config: CrawlerConfig,
        options: StartOptions,
    ) -> Result<SessionId, KumoError> {
        let id = SessionId::new();
        let mut session = CrawlSession::new(id, &config);
        session.config_hash = options.config_hash;
        let session = Arc::new(Mutex::new(session));
        let cancel = CancellationToken::new();

        let parts = CrawlParts {
            fetcher: self.fetcher.clone(),
            extractor: self.extractor.clone(),
            clock: self.clock.clone(),
            scorer: options.scorer,
            robots_agent: self.robots_agent.clone(),
        };
        let coordinator = Coordinator::new(config, session.clone(), parts, cancel.clone())?;
        let sink = self.sinks.open(&coordinator.session())?;

        let (done_tx, done_rx) = watch::channel(None);
        self.store.create(SessionHandle {
            session,
            cancel,
            done: done_rx,
        });

        tokio::spawn(async move {
            let finished = coordinator.run(sink).await;
            let _ = done_tx.send(Some(finished));
        });

        Ok(id)
    }

    /// Requests cancellation; returns false for unknown or finished sessions
    pub fn cancel(&self, id: &SessionId) -> bool {
        match self.store.get(id) {
            Some(handle) if !handle.is_finished() => {
                tracing::info!("Cancelling session {}", id);
                handle.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Snapshot of a session's progress
    pub fn status(&self, id: &SessionId) -> Option<CrawlSession> {
        self.store.get(id).map(|handle| handle.snapshot())
    }

    /// Waits for a session to reach a terminal state
    pub async fn wait(&self, id: &SessionId) -> Option<CrawlSession> {
        let handle = self.store.get(id)?;
        let mut done = handle.done.clone();
        loop {
            let finished = (*done.borrow()).clone();
            if finished.is_some() {
                return finished;
            }
            if done.changed().await.is_err() {
                // The engine task went away without reporting
                return Some(handle.snapshot());
            }
        }
    }

    /// Forgets a session, cancelling it first if it is still running
    pub fn remove(&self, id: &SessionId) -> Option<CrawlSession> {
        let handle = self.store.remove(id)?;
        if !handle.is_finished() {
            handle.cancel.cancel();
        }
        Some(handle.snapshot())
    }

    /// Ids of all tracked sessions
    pub fn sessions(&self) -> Vec<SessionId> {
        self.store.ids()
    }
}
