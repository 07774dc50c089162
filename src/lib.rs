//! threatpatterns -- recurring pattern detection over threat-intelligence incidents.
//!
//! This crate provides the batch detection engine (detectors, pattern keys,
//! reconciliation) together with the SQLite-backed incident source and
//! pattern store it reads from and writes to.

pub mod config;
pub mod detect;
pub mod patterns;
pub mod pipeline;
pub mod storage;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::config::ThreatPatternsConfig;
use crate::pipeline::{RunOptions, RunReport};
use crate::storage::SqliteStore;

/// Run one detection pass against the configured database.
///
/// Opening the database is the only error surfaced here besides the two
/// fatal snapshot reads; everything else ends up in the report.
pub fn detect(config: &ThreatPatternsConfig, window_days: u32, top_n: usize) -> Result<RunReport> {
    let db_path = &config.storage.db_path;
    tracing::info!(db_path = %db_path.display(), "Opening pattern database");
    let store = SqliteStore::open(db_path)?;

    let bank = detect::engine::default_bank();
    let options = RunOptions {
        window_days,
        now: Utc::now(),
        top_n,
    };
    let report = pipeline::run(&store, &store, &bank, config, &options)
        .context("detection run aborted")?;
    Ok(report)
}
