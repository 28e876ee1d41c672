//! SQLite storage for the web time tracker.
//!
//! [`Database`] implements [`wt_core::Store`]: settings, per-day totals, the
//! per-day timeline and the two session markers live in one `SQLite` file.
//!
//! # Thread Safety
//!
//! `rusqlite::Connection` is `Send` but not `Sync`, so the connection sits
//! behind a `Mutex`. Queries are short and local; the async [`Store`] methods
//! run them inline rather than on a blocking pool.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 with millisecond precision and a
//! `Z` suffix (e.g., `2024-01-15T10:30:00.000Z`), so lexicographic order
//! matches chronological order. Days are stored as `YYYY-MM-DD` local dates.
//!
//! ## Key-value rows
//!
//! Settings and the live/pending session markers are JSON documents in the
//! `kv` table. Missing fields in stored settings fall back to defaults.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use wt_core::{
    DayRecord, Domain, LiveSession, PendingSession, Settings, Store, StoreError, StoreOp,
    TimelineBlock, ValidationError,
};

const SETTINGS_KEY: &str = "settings";
const LIVE_KEY: &str = "live_session";
const PENDING_KEY: &str = "pending_session";

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A JSON document in the `kv` table could not be encoded or decoded.
    #[error("invalid json for {key}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    /// A stored timestamp is not RFC 3339.
    #[error("invalid timestamp in {table}: {timestamp}")]
    TimestampParse {
        table: &'static str,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored domain no longer validates.
    #[error("invalid domain in {table}: {source}")]
    InvalidDomain {
        table: &'static str,
        #[source]
        source: ValidationError,
    },
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        let message = err.to_string();
        match err {
            DbError::Sqlite(_) => Self::Backend(message),
            DbError::Json { key, .. } => Self::Corrupt { key, message },
            DbError::TimestampParse { table, .. } | DbError::InvalidDomain { table, .. } => {
                Self::Corrupt {
                    key: table.to_string(),
                    message,
                }
            }
        }
    }
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.lock().execute_batch(
            "
            -- Settings and session markers, one JSON document per key
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Cumulative rounded milliseconds per domain and local day
            CREATE TABLE IF NOT EXISTS day_totals (
                day TEXT NOT NULL,
                domain TEXT NOT NULL,
                ms INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (day, domain)
            );

            -- Finished session blocks; id preserves insertion order
            CREATE TABLE IF NOT EXISTS timeline_blocks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                day TEXT NOT NULL,
                domain TEXT NOT NULL,
                start_at TEXT NOT NULL,
                end_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_timeline_blocks_day ON timeline_blocks(day);
            ",
        )?;
        Ok(())
    }

    /// Reads the tracking settings, or the defaults if none were saved.
    pub fn load_settings(&self) -> Result<Settings, DbError> {
        Ok(get_json(&self.lock(), SETTINGS_KEY)?.unwrap_or_default())
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<(), DbError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        put_json(&tx, SETTINGS_KEY, Some(settings))?;
        tx.commit()?;
        Ok(())
    }

    pub fn load_live(&self) -> Result<Option<LiveSession>, DbError> {
        get_json(&self.lock(), LIVE_KEY)
    }

    pub fn load_pending(&self) -> Result<Option<PendingSession>, DbError> {
        get_json(&self.lock(), PENDING_KEY)
    }

    /// Loads the totals and timeline recorded for `day`.
    pub fn load_day(&self, day: NaiveDate) -> Result<DayRecord, DbError> {
        let conn = self.lock();
        let key = day_key(day);

        let mut domains = BTreeMap::new();
        let mut stmt = conn.prepare("SELECT domain, ms FROM day_totals WHERE day = ?1")?;
        let rows = stmt.query_map(params![key], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (domain, ms) = row?;
            domains.insert(parse_domain(domain, "day_totals")?, ms);
        }

        let mut timeline = Vec::new();
        let mut stmt = conn.prepare(
            "
            SELECT domain, start_at, end_at
            FROM timeline_blocks
            WHERE day = ?1
            ORDER BY id ASC
            ",
        )?;
        let rows = stmt.query_map(params![key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (domain, start, end) = row?;
            timeline.push(TimelineBlock {
                domain: parse_domain(domain, "timeline_blocks")?,
                start: parse_timestamp(&start, "timeline_blocks")?,
                end: parse_timestamp(&end, "timeline_blocks")?,
            });
        }

        Ok(DayRecord { domains, timeline })
    }

    /// Applies a batch of writes in a single transaction.
    pub fn apply_batch(&self, ops: &[StoreOp]) -> Result<(), DbError> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for op in ops {
            apply_op(&tx, op)?;
        }
        tx.commit()?;
        tracing::trace!(ops = ops.len(), "batch committed");
        Ok(())
    }
}

fn apply_op(tx: &Transaction<'_>, op: &StoreOp) -> Result<(), DbError> {
    match op {
        StoreOp::AddTotal { day, domain, ms } => {
            if *ms > 0 {
                tx.execute(
                    "
                    INSERT INTO day_totals (day, domain, ms) VALUES (?1, ?2, ?3)
                    ON CONFLICT(day, domain) DO UPDATE SET ms = ms + excluded.ms
                    ",
                    params![day_key(*day), domain.as_str(), ms],
                )?;
            }
        }
        StoreOp::AppendBlock { day, block } => {
            tx.execute(
                "
                INSERT INTO timeline_blocks (day, domain, start_at, end_at)
                VALUES (?1, ?2, ?3, ?4)
                ",
                params![
                    day_key(*day),
                    block.domain.as_str(),
                    format_timestamp(block.start),
                    format_timestamp(block.end),
                ],
            )?;
        }
        StoreOp::SetLive(live) => put_json(tx, LIVE_KEY, live.as_ref())?,
        StoreOp::SetPending(pending) => put_json(tx, PENDING_KEY, pending.as_ref())?,
    }
    Ok(())
}

fn get_json<T: DeserializeOwned>(conn: &Connection, key: &str) -> Result<Option<T>, DbError> {
    let value: Option<String> = conn
        .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()?;
    value
        .map(|value| {
            serde_json::from_str(&value).map_err(|source| DbError::Json {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
}

/// Writes `value` under `key`, or deletes the row for `None`.
fn put_json<T: Serialize>(tx: &Transaction<'_>, key: &str, value: Option<&T>) -> Result<(), DbError> {
    let Some(value) = value else {
        tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        return Ok(());
    };
    let json = serde_json::to_string(value).map_err(|source| DbError::Json {
        key: key.to_string(),
        source,
    })?;
    tx.execute(
        "
        INSERT INTO kv (key, value) VALUES (?1, ?2)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        ",
        params![key, json],
    )?;
    Ok(())
}

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

fn parse_domain(value: String, table: &'static str) -> Result<Domain, DbError> {
    Domain::new(value).map_err(|source| DbError::InvalidDomain { table, source })
}

fn parse_timestamp(timestamp: &str, table: &'static str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            table,
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl Store for Database {
    async fn settings(&self) -> Result<Settings, StoreError> {
        Ok(self.load_settings()?)
    }

    async fn set_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        Ok(self.save_settings(settings)?)
    }

    async fn day(&self, day: NaiveDate) -> Result<DayRecord, StoreError> {
        Ok(self.load_day(day)?)
    }

    async fn live_session(&self) -> Result<Option<LiveSession>, StoreError> {
        Ok(self.load_live()?)
    }

    async fn pending_session(&self) -> Result<Option<PendingSession>, StoreError> {
        Ok(self.load_pending()?)
    }

    async fn apply(&self, ops: Vec<StoreOp>) -> Result<(), StoreError> {
        Ok(self.apply_batch(&ops)?)
    }
}
