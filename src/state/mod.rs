//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `CrawlSession`: progress counters and lifecycle state of one crawl
//! - `DomainState`: per-domain timing and robots rules used by the politeness gate

mod domain_state;
mod session;

// Re-export main types
pub use domain_state::{DomainState, MAX_RATE_LIMIT_DELAY};
pub use session::{CrawlSession, SessionId, SessionState};
