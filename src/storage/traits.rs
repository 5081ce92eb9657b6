//! Storage traits and error types
//!
//! This module defines the sink interface crawl results are written through
//! and the associated error type.

use crate::crawler::CrawlResult;
use crate::state::CrawlSession;
use thiserror::Error;

/// Errors that can occur during storage operations
///
/// Any of these is fatal to the session that hit it.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record rejected: {0}")]
    Rejected(String),

    #[error("Storage closed")]
    Closed,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Destination for crawl output
///
/// A sink is driven from a single blocking task, so implementations need
/// `Send` but not `Sync`. Records arrive in the order workers produced them.
pub trait ResultSink: Send {
    /// Persists one page record
    fn write(&mut self, result: &CrawlResult) -> StorageResult<()>;

    /// Inserts or replaces the session row
    ///
    /// Called once when the session starts and once with the final snapshot.
    fn record_session(&mut self, session: &CrawlSession) -> StorageResult<()>;

    /// Makes everything written so far durable
    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }
}

impl<S: ResultSink + ?Sized> ResultSink for Box<S> {
    fn write(&mut self, result: &CrawlResult) -> StorageResult<()> {
        (**self).write(result)
    }

    fn record_session(&mut self, session: &CrawlSession) -> StorageResult<()> {
        (**self).record_session(session)
    }

    fn flush(&mut self) -> StorageResult<()> {
        (**self).flush()
    }
}
