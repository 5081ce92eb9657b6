//! Storage module for persisting crawl data
//!
//! This module handles everything written out of a crawl session:
//! - The [`ResultSink`] trait the crawl engine emits records through
//! - SQLite persistence of sessions, pages and links
//! - An in-memory sink for embedding and tests

mod memory;
mod schema;
mod sqlite;
mod traits;

pub use memory::MemorySink;
pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteSink;
pub use traits::{ResultSink, StorageError, StorageResult};

use std::path::Path;

/// Opens (or creates) the SQLite database at `path`
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteSink)` - Successfully initialized storage
/// * `Err(StorageError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> StorageResult<SqliteSink> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    SqliteSink::new(path)
}
