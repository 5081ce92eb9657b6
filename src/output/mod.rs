//! Output module for generating crawl summaries and reports
//!
//! This module handles:
//! - Aggregating link and content statistics
//! - Generating markdown summaries of crawl sessions
//! - Printing statistics for the CLI

mod markdown;
pub mod stats;

pub use markdown::{format_markdown_summary, generate_markdown_summary};
pub use stats::{print_statistics, CrawlStatistics};

use crate::state::{CrawlSession, SessionId};
use crate::storage::SqliteSink;
use crate::KumoError;

/// Loads a session and its statistics from storage
///
/// # Arguments
///
/// * `storage` - The database holding crawl data
/// * `session` - Session to summarize; the latest one when `None`
///
/// # Returns
///
/// * `Ok((CrawlSession, CrawlStatistics))` - The session and its statistics
/// * `Err(KumoError)` - No such session, or the query failed
pub fn generate_summary(
    storage: &SqliteSink,
    session: Option<&SessionId>,
) -> Result<(CrawlSession, CrawlStatistics), KumoError> {
    let found = match session {
        Some(id) => storage.load_session(id)?,
        None => storage.latest_session()?,
    };
    let session = found.ok_or_else(|| {
        KumoError::SessionNotFound(
            session.map_or_else(|| "no sessions recorded".to_string(), |id| id.to_string()),
        )
    })?;

    let stats = storage.load_statistics(Some(&session.id))?;
    Ok((session, stats))
}
