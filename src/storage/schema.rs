//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Create tables and indices if they do not exist yet.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS incidents (
            id TEXT PRIMARY KEY,
            discovered_at TEXT,
            published_at TEXT,
            actor_id TEXT,
            actor_name TEXT,
            sector TEXT,
            target_countries_json TEXT NOT NULL DEFAULT '[]',
            ttps_json TEXT NOT NULL DEFAULT '[]',
            ingested_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS patterns (
            id INTEGER PRIMARY KEY,
            pattern_type TEXT NOT NULL,
            pattern_key TEXT NOT NULL UNIQUE,
            data TEXT NOT NULL,
            confidence REAL NOT NULL,
            first_detected TEXT NOT NULL,
            last_detected TEXT NOT NULL,
            detection_count INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'active'
        );

        CREATE INDEX IF NOT EXISTS idx_incidents_discovered ON incidents(discovered_at);
        CREATE INDEX IF NOT EXISTS idx_incidents_published ON incidents(published_at);
        CREATE INDEX IF NOT EXISTS idx_patterns_count ON patterns(detection_count);",
    )?;
    Ok(())
}
