//! `patterns` table: the durable side of reconciliation.

use rusqlite::{params, OptionalExtension, Row};
use tracing::warn;

use super::{format_ts, parse_ts, PatternStore, SqliteStore, StoreError};
use crate::patterns::{NewPattern, PatternStatus, PatternSummary, PatternUpdate, PersistedPattern};

const PATTERN_COLUMNS: &str = "id, pattern_type, pattern_key, data, confidence, first_detected,
                               last_detected, detection_count, status";

type RawPattern = (i64, String, String, String, f64, String, String, i64, String);

fn raw_pattern(row: &Row<'_>) -> rusqlite::Result<RawPattern> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn decode_pattern(raw: RawPattern) -> Result<PersistedPattern, StoreError> {
    let (id, pattern_type, pattern_key, data, confidence, first, last, detection_count, status) = raw;
    Ok(PersistedPattern {
        id,
        pattern_type,
        pattern_key,
        data: serde_json::from_str(&data)?,
        confidence,
        first_detected: parse_ts(&first)?,
        last_detected: parse_ts(&last)?,
        detection_count,
        status: status.parse::<PatternStatus>().map_err(StoreError::Status)?,
    })
}

impl SqliteStore {
    pub fn find_pattern(&self, pattern_key: &str) -> Result<Option<PersistedPattern>, StoreError> {
        let conn = self.pool.get()?;
        let raw = conn
            .query_row(
                &format!("SELECT {PATTERN_COLUMNS} FROM patterns WHERE pattern_key = ?1"),
                params![pattern_key],
                raw_pattern,
            )
            .optional()?;
        raw.map(decode_pattern).transpose()
    }
}

impl PatternStore for SqliteStore {
    fn list_patterns(&self) -> Result<Vec<PatternSummary>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT id, pattern_key, detection_count FROM patterns")?;
        let rows = stmt.query_map([], |row| {
            Ok(PatternSummary {
                id: row.get(0)?,
                pattern_key: row.get(1)?,
                detection_count: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn insert_patterns(&self, records: &[NewPattern]) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO patterns (pattern_type, pattern_key, data, confidence,
                                       first_detected, last_detected, detection_count, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for p in records {
                stmt.execute(params![
                    p.pattern_type.as_str(),
                    p.pattern_key,
                    p.data,
                    p.confidence,
                    format_ts(p.first_detected),
                    format_ts(p.last_detected),
                    p.detection_count,
                    p.status.as_str(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn update_pattern(&self, id: i64, update: &PatternUpdate) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE patterns
             SET data = ?1, confidence = ?2, last_detected = ?3, detection_count = ?4
             WHERE id = ?5",
            params![
                update.data,
                update.confidence,
                format_ts(update.last_detected),
                update.detection_count,
                id
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::PatternNotFound(id));
        }
        Ok(())
    }

    fn top_patterns(&self, limit: usize) -> Result<Vec<PersistedPattern>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PATTERN_COLUMNS} FROM patterns
             ORDER BY detection_count DESC, last_detected DESC, id ASC
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], raw_pattern)?;

        let mut patterns = Vec::new();
        for r in rows {
            let raw = r?;
            let key = raw.2.clone();
            match decode_pattern(raw) {
                Ok(p) => patterns.push(p),
                Err(e) => warn!(pattern_key = %key, error = %e, "Skipping malformed pattern row"),
            }
        }
        Ok(patterns)
    }
}
