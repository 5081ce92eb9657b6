//! Crawl session state
//!
//! A session moves through `Pending -> Running -> Draining -> Completed`, or
//! ends `Aborted` on cancellation or a fatal storage error.

use crate::config::CrawlerConfig;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque identifier of a crawl session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of a crawl session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, frontier seeded, workers not yet started
    Pending,
    /// Workers are pulling from the frontier
    Running,
    /// No new work will be started; in-flight fetches are finishing
    Draining,
    /// All workers finished normally
    Completed,
    /// Cancelled or stopped by a fatal error
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Converts the state to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Completed => "completed",
            Self::Aborted => "aborted",
        }
    }

    /// Parses a state from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "draining" => Some(Self::Draining),
            "completed" => Some(Self::Completed),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Snapshot of a crawl session's progress
#[derive(Debug, Clone)]
pub struct CrawlSession {
    pub id: SessionId,
    pub base_url: String,
    pub max_depth: u32,
    pub max_pages: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Successfully fetched pages (2xx/3xx), duplicates included
    pub pages_crawled: u32,
    /// Pages whose final attempt failed
    pub pages_failed: u32,
    /// Pages refused by robots rules
    pub pages_blocked: u32,
    /// Successfully fetched pages whose content was seen before
    pub duplicate_pages: u32,

    pub state: SessionState,
    /// Reason for an abort, if any
    pub error: Option<String>,
    /// Hash of the configuration file the session was started from
    pub config_hash: Option<String>,
}

impl CrawlSession {
    /// Creates a pending session for the given configuration
    pub fn new(id: SessionId, config: &CrawlerConfig) -> Self {
        Self {
            id,
            base_url: config.base_url.clone(),
            max_depth: config.max_depth,
            max_pages: config.max_pages,
            started_at: Utc::now(),
            finished_at: None,
            pages_crawled: 0,
            pages_failed: 0,
            pages_blocked: 0,
            duplicate_pages: 0,
            state: SessionState::Pending,
            error: None,
            config_hash: None,
        }
    }

    /// Total number of results emitted so far
    pub fn pages_attempted(&self) -> u32 {
        self.pages_crawled + self.pages_failed + self.pages_blocked
    }

    /// Moves the session into a terminal state and stamps the finish time
    pub fn finish(&mut self, state: SessionState, error: Option<String>) {
        self.state = state;
        self.finished_at = Some(Utc::now());
        if error.is_some() {
            self.error = error;
        }
    }

    /// Wall-clock run time, up to now for a running session
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at.unwrap_or_else(Utc::now) - self.started_at
    }
}
