//! SQLite storage layer -- schema, incident source, and pattern store.

pub mod incidents;
pub mod patterns;
pub mod schema;

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use thiserror::Error;

use crate::detect::Incident;
use crate::patterns::{NewPattern, PatternSummary, PatternUpdate, PersistedPattern};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid timestamp '{0}'")]
    Timestamp(String),
    #[error("invalid pattern status: {0}")]
    Status(String),
    #[error("pattern {0} not found")]
    PatternNotFound(i64),
}

/// Supplies the incidents for an analysis window. Order is not guaranteed.
pub trait IncidentSource {
    fn read_incidents(&self, since: DateTime<Utc>) -> Result<Vec<Incident>, StoreError>;
}

/// Durable table of detected patterns.
pub trait PatternStore {
    /// Minimal projection used for reconciliation.
    fn list_patterns(&self) -> Result<Vec<PatternSummary>, StoreError>;

    /// Insert one batch; either every row lands or none does.
    fn insert_patterns(&self, records: &[NewPattern]) -> Result<(), StoreError>;

    fn update_pattern(&self, id: i64, update: &PatternUpdate) -> Result<(), StoreError>;

    /// Most frequently re-detected patterns first.
    fn top_patterns(&self, limit: usize) -> Result<Vec<PersistedPattern>, StoreError>;
}

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)
        .with_context(|| format!("failed to open database {}", path.display()))?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Incident source and pattern store backed by one SQLite pool.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(open_pool(path)?))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

/// Timestamps are stored as second-precision RFC 3339 in UTC so that text
/// comparison in SQL matches chronological order.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::Timestamp(raw.to_string()))
}
