//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the [`ResultSink`]
//! trait, plus the read queries the CLI uses for statistics.

use crate::crawler::{CrawlResult, PageStatus};
use crate::output::CrawlStatistics;
use crate::state::{CrawlSession, SessionId, SessionState};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{ResultSink, StorageError, StorageResult};
use crate::url::extract_domain;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use url::Url;

const SESSION_COLUMNS: &str = "id, base_url, max_depth, max_pages, started_at, finished_at,
    pages_crawled, pages_failed, pages_blocked, duplicate_pages, state, error, config_hash";

/// SQLite result sink
pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteSink)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Loads a session row
    pub fn load_session(&self, id: &SessionId) -> StorageResult<Option<CrawlSession>> {
        let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
        let raw = self
            .conn
            .query_row(&sql, params![id.to_string()], RawSession::from_row)
            .optional()?;
        raw.map(RawSession::into_session).transpose()
    }

    /// Loads the most recently started session
    pub fn latest_session(&self) -> StorageResult<Option<CrawlSession>> {
        let sql = format!(
            "SELECT {} FROM sessions ORDER BY started_at DESC LIMIT 1",
            SESSION_COLUMNS
        );
        let raw = self
            .conn
            .query_row(&sql, [], RawSession::from_row)
            .optional()?;
        raw.map(RawSession::into_session).transpose()
    }

    /// Loads every page record of a session, in insertion order
    pub fn load_pages(&self, id: &SessionId) -> StorageResult<Vec<CrawlResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT url, depth, discovered_from, title, extracted_text, status_kind,
             http_status, error_message, fetch_duration_ms, is_duplicate, content_hash,
             attempts, crawled_at
             FROM pages WHERE session_id = ?1 ORDER BY id",
        )?;
        let mut links = self
            .conn
            .prepare("SELECT to_url FROM links WHERE session_id = ?1 AND from_url = ?2 ORDER BY id")?;

        let rows = stmt.query_map(params![id.to_string()], |row| {
            Ok(RawPage {
                url: row.get(0)?,
                depth: row.get(1)?,
                discovered_from: row.get(2)?,
                title: row.get(3)?,
                extracted_text: row.get(4)?,
                status_kind: row.get(5)?,
                http_status: row.get(6)?,
                error_message: row.get(7)?,
                fetch_duration_ms: row.get(8)?,
                is_duplicate: row.get(9)?,
                content_hash: row.get(10)?,
                attempts: row.get(11)?,
                crawled_at: row.get(12)?,
            })
        })?;

        let mut pages = Vec::new();
        for raw in rows {
            let raw = raw?;
            let outbound_links = links
                .query_map(params![id.to_string(), raw.url], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;

            let status = PageStatus::from_parts(&raw.status_kind, raw.http_status, raw.error_message)
                .ok_or_else(|| {
                    StorageError::Database(format!("unknown status kind '{}'", raw.status_kind))
                })?;

            pages.push(CrawlResult {
                session_id: *id,
                url: raw.url,
                depth: raw.depth,
                discovered_from: raw.discovered_from,
                title: raw.title,
                extracted_text: raw.extracted_text,
                outbound_links,
                status,
                fetch_duration_ms: raw.fetch_duration_ms.max(0) as u64,
                is_duplicate: raw.is_duplicate,
                content_hash: raw.content_hash,
                attempts: raw.attempts,
                timestamp: parse_timestamp(&raw.crawled_at)?,
            });
        }

        Ok(pages)
    }

    /// Aggregates statistics for one session, or for the whole database
    pub fn load_statistics(&self, session: Option<&SessionId>) -> StorageResult<CrawlStatistics> {
        let session = session.map(|id| id.to_string());
        let mut stats = CrawlStatistics::default();

        let (total, successful, failed, blocked, duplicates, domains, avg_ms): (
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
            Option<f64>,
        ) = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(status_kind = 'ok'), 0),
                    COALESCE(SUM(status_kind NOT IN ('ok', 'blocked')), 0),
                    COALESCE(SUM(status_kind = 'blocked'), 0),
                    COALESCE(SUM(status_kind = 'ok' AND is_duplicate), 0),
                    COUNT(DISTINCT NULLIF(domain, '')),
                    AVG(CASE WHEN status_kind != 'blocked' THEN fetch_duration_ms END)
             FROM pages WHERE (?1 IS NULL OR session_id = ?1)",
            params![session],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            },
        )?;

        stats.total_pages = total as u64;
        stats.successful_pages = successful as u64;
        stats.failed_pages = failed as u64;
        stats.blocked_pages = blocked as u64;
        stats.duplicate_pages = duplicates as u64;
        stats.unique_domains = domains as u64;
        stats.avg_fetch_ms = avg_ms.unwrap_or(0.0);

        let total_links: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM links WHERE (?1 IS NULL OR session_id = ?1)",
            params![session],
            |row| row.get(0),
        )?;
        stats.total_links = total_links as u64;

        let mut stmt = self.conn.prepare(
            "SELECT status_kind, COUNT(*) FROM pages
             WHERE (?1 IS NULL OR session_id = ?1) GROUP BY status_kind",
        )?;
        let rows = stmt.query_map(params![session], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (kind, count) = row?;
            stats.pages_by_status.insert(kind, count as u64);
        }

        let mut stmt = self.conn.prepare(
            "SELECT depth, COUNT(*) FROM pages
             WHERE (?1 IS NULL OR session_id = ?1) GROUP BY depth",
        )?;
        let rows = stmt.query_map(params![session], |row| {
            Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (depth, count) = row?;
            stats.depth_breakdown.insert(depth, count as u64);
        }

        Ok(stats)
    }
}

impl ResultSink for SqliteSink {
    fn write(&mut self, result: &CrawlResult) -> StorageResult<()> {
        let domain = Url::parse(&result.url)
            .ok()
            .as_ref()
            .and_then(extract_domain)
            .unwrap_or_default();

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO pages (session_id, url, domain, depth, discovered_from, title,
             extracted_text, status_kind, http_status, error_message, fetch_duration_ms,
             is_duplicate, content_hash, attempts, crawled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                result.session_id.to_string(),
                result.url,
                domain,
                result.depth,
                result.discovered_from,
                result.title,
                result.extracted_text,
                result.status.kind(),
                result.status.http_status(),
                result.status.error_message(),
                result.fetch_duration_ms as i64,
                result.is_duplicate,
                result.content_hash,
                result.attempts,
                result.timestamp.to_rfc3339(),
            ],
        )?;

        {
            let mut insert_link = tx.prepare(
                "INSERT OR IGNORE INTO links (session_id, from_url, to_url) VALUES (?1, ?2, ?3)",
            )?;
            for link in &result.outbound_links {
                insert_link.execute(params![result.session_id.to_string(), result.url, link])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn record_session(&mut self, session: &CrawlSession) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO sessions (id, base_url, max_depth, max_pages, started_at, finished_at,
             pages_crawled, pages_failed, pages_blocked, duplicate_pages, state, error, config_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                finished_at = excluded.finished_at,
                pages_crawled = excluded.pages_crawled,
                pages_failed = excluded.pages_failed,
                pages_blocked = excluded.pages_blocked,
                duplicate_pages = excluded.duplicate_pages,
                state = excluded.state,
                error = excluded.error,
                config_hash = excluded.config_hash",
            params![
                session.id.to_string(),
                session.base_url,
                session.max_depth,
                session.max_pages,
                session.started_at.to_rfc3339(),
                session.finished_at.map(|t| t.to_rfc3339()),
                session.pages_crawled,
                session.pages_failed,
                session.pages_blocked,
                session.duplicate_pages,
                session.state.to_db_string(),
                session.error,
                session.config_hash,
            ],
        )?;
        Ok(())
    }
}

struct RawPage {
    url: String,
    depth: u32,
    discovered_from: Option<String>,
    title: Option<String>,
    extracted_text: String,
    status_kind: String,
    http_status: Option<u16>,
    error_message: Option<String>,
    fetch_duration_ms: i64,
    is_duplicate: bool,
    content_hash: Option<String>,
    attempts: u32,
    crawled_at: String,
}

struct RawSession {
    id: String,
    base_url: String,
    max_depth: u32,
    max_pages: u32,
    started_at: String,
    finished_at: Option<String>,
    pages_crawled: u32,
    pages_failed: u32,
    pages_blocked: u32,
    duplicate_pages: u32,
    state: String,
    error: Option<String>,
    config_hash: Option<String>,
}

impl RawSession {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            base_url: row.get(1)?,
            max_depth: row.get(2)?,
            max_pages: row.get(3)?,
            started_at: row.get(4)?,
            finished_at: row.get(5)?,
            pages_crawled: row.get(6)?,
            pages_failed: row.get(7)?,
            pages_blocked: row.get(8)?,
            duplicate_pages: row.get(9)?,
            state: row.get(10)?,
            error: row.get(11)?,
            config_hash: row.get(12)?,
        })
    }

    fn into_session(self) -> StorageResult<CrawlSession> {
        let id = self
            .id
            .parse::<SessionId>()
            .map_err(|e| StorageError::Database(format!("bad session id '{}': {}", self.id, e)))?;
        let state = SessionState::from_db_string(&self.state)
            .ok_or_else(|| StorageError::Database(format!("unknown session state '{}'", self.state)))?;

        Ok(CrawlSession {
            id,
            base_url: self.base_url,
            max_depth: self.max_depth,
            max_pages: self.max_pages,
            started_at: parse_timestamp(&self.started_at)?,
            finished_at: self.finished_at.as_deref().map(parse_timestamp).transpose()?,
            pages_crawled: self.pages_crawled,
            pages_failed: self.pages_failed,
            pages_blocked: self.pages_blocked,
            duplicate_pages: self.duplicate_pages,
            state,
            error: self.error,
            config_hash: self.config_hash,
        })
    }
}

fn parse_timestamp(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Database(format!("bad timestamp '{}': {}", s, e)))
}
