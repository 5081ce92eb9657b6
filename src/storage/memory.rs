//! In-memory result sink
//!
//! Keeps every record in shared vectors so a caller can inspect a session's
//! output while holding a clone of the sink.

use crate::crawler::CrawlResult;
use crate::state::{CrawlSession, SessionId};
use crate::storage::traits::{ResultSink, StorageError, StorageResult};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Records {
    results: Vec<CrawlResult>,
    sessions: Vec<CrawlSession>,
}

/// [`ResultSink`] that stores records in memory
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Records>>,
    /// Number of page writes accepted before every write fails
    fail_after: Option<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that rejects page writes once `writes` records are stored
    pub fn failing_after(writes: usize) -> Self {
        Self {
            records: Arc::default(),
            fail_after: Some(writes),
        }
    }

    /// Copy of all page records, in write order
    pub fn results(&self) -> Vec<CrawlResult> {
        self.records.lock().results.clone()
    }

    /// Page records of one session
    pub fn results_for(&self, id: &SessionId) -> Vec<CrawlResult> {
        self.records
            .lock()
            .results
            .iter()
            .filter(|r| r.session_id == *id)
            .cloned()
            .collect()
    }

    /// Latest recorded snapshot of a session
    pub fn session(&self, id: &SessionId) -> Option<CrawlSession> {
        self.records
            .lock()
            .sessions
            .iter()
            .rev()
            .find(|s| s.id == *id)
            .cloned()
    }

    /// Every session snapshot recorded, oldest first
    pub fn session_snapshots(&self) -> Vec<CrawlSession> {
        self.records.lock().sessions.clone()
    }
}

impl ResultSink for MemorySink {
    fn write(&mut self, result: &CrawlResult) -> StorageResult<()> {
        let mut records = self.records.lock();
        if let Some(limit) = self.fail_after {
            if records.results.len() >= limit {
                return Err(StorageError::Rejected(format!(
                    "sink full after {} records",
                    limit
                )));
            }
        }
        records.results.push(result.clone());
        Ok(())
    }

    fn record_session(&mut self, session: &CrawlSession) -> StorageResult<()> {
        self.records.lock().sessions.push(session.clone());
        Ok(())
    }
}
