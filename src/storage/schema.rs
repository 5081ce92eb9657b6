//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Kumo-Crawl database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per crawl session, rewritten with the final snapshot
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    base_url TEXT NOT NULL,
    max_depth INTEGER NOT NULL,
    max_pages INTEGER NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    pages_crawled INTEGER NOT NULL DEFAULT 0,
    pages_failed INTEGER NOT NULL DEFAULT 0,
    pages_blocked INTEGER NOT NULL DEFAULT 0,
    duplicate_pages INTEGER NOT NULL DEFAULT 0,
    state TEXT NOT NULL,
    error TEXT,
    config_hash TEXT
);

-- One row per crawled URL per session
CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    url TEXT NOT NULL,
    domain TEXT NOT NULL DEFAULT '',
    depth INTEGER NOT NULL,
    discovered_from TEXT,
    title TEXT,
    extracted_text TEXT NOT NULL DEFAULT '',
    status_kind TEXT NOT NULL,
    http_status INTEGER,
    error_message TEXT,
    fetch_duration_ms INTEGER NOT NULL DEFAULT 0,
    is_duplicate INTEGER NOT NULL DEFAULT 0,
    content_hash TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    crawled_at TEXT NOT NULL,
    UNIQUE(session_id, url)
);

CREATE INDEX IF NOT EXISTS idx_pages_session ON pages(session_id);
CREATE INDEX IF NOT EXISTS idx_pages_status ON pages(status_kind);
CREATE INDEX IF NOT EXISTS idx_pages_domain ON pages(domain);
CREATE INDEX IF NOT EXISTS idx_pages_hash ON pages(content_hash);

-- Outbound links found on each page
CREATE TABLE IF NOT EXISTS links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    from_url TEXT NOT NULL,
    to_url TEXT NOT NULL,
    UNIQUE(session_id, from_url, to_url)
);

CREATE INDEX IF NOT EXISTS idx_links_from ON links(session_id, from_url);
CREATE INDEX IF NOT EXISTS idx_links_to ON links(session_id, to_url);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

/// Current schema version, stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 1;
