//! Incident rows: import from feed exports and read back for a detection window.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{format_ts, parse_ts, IncidentSource, SqliteStore, StoreError};
use crate::detect::Incident;

/// Incident as delivered by a feed, before its timestamp is resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: String,
    #[serde(default)]
    pub discovered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub actor_name: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub target_countries: Vec<String>,
    #[serde(default)]
    pub ttps: Vec<String>,
}

impl IncidentRecord {
    /// `discovered_at` wins, `published_at` is the fallback. Records with
    /// neither cannot be placed on a timeline and resolve to `None`.
    pub fn resolve(self) -> Option<Incident> {
        let occurred_at = self.discovered_at.or(self.published_at)?;
        Some(Incident {
            id: self.id,
            occurred_at,
            actor_id: self.actor_id,
            actor_name: self.actor_name,
            sector: self.sector,
            target_countries: self.target_countries,
            ttps: self.ttps,
        })
    }
}

impl SqliteStore {
    /// Upsert incidents by id in a single transaction. Returns rows written.
    pub fn import_incidents(&self, records: &[IncidentRecord]) -> Result<usize, StoreError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO incidents (id, discovered_at, published_at, actor_id, actor_name,
                                        sector, target_countries_json, ttps_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                     discovered_at = excluded.discovered_at,
                     published_at = excluded.published_at,
                     actor_id = excluded.actor_id,
                     actor_name = excluded.actor_name,
                     sector = excluded.sector,
                     target_countries_json = excluded.target_countries_json,
                     ttps_json = excluded.ttps_json",
            )?;
            for record in records {
                stmt.execute(params![
                    record.id,
                    record.discovered_at.map(format_ts),
                    record.published_at.map(format_ts),
                    record.actor_id,
                    record.actor_name,
                    record.sector,
                    serde_json::to_string(&record.target_countries)?,
                    serde_json::to_string(&record.ttps)?,
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = records.len(), "Imported incidents");
        Ok(records.len())
    }

    pub fn count_incidents(&self) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM incidents", [], |row| row.get(0))?)
    }
}

impl IncidentSource for SqliteStore {
    fn read_incidents(&self, since: DateTime<Utc>) -> Result<Vec<Incident>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, discovered_at, published_at, actor_id, actor_name, sector,
                    target_countries_json, ttps_json
             FROM incidents
             WHERE COALESCE(discovered_at, published_at) >= ?1",
        )?;

        let rows = stmt.query_map(params![format_ts(since)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut incidents = Vec::new();
        for r in rows {
            let (id, discovered, published, actor_id, actor_name, sector, countries, ttps) = r?;
            match decode_row(discovered, published, &countries, &ttps) {
                Ok((discovered_at, published_at, target_countries, ttps)) => {
                    let record = IncidentRecord {
                        id,
                        discovered_at,
                        published_at,
                        actor_id,
                        actor_name,
                        sector,
                        target_countries,
                        ttps,
                    };
                    if let Some(incident) = record.resolve() {
                        incidents.push(incident);
                    }
                }
                Err(e) => warn!(incident = %id, error = %e, "Skipping malformed incident row"),
            }
        }
        Ok(incidents)
    }
}

type DecodedRow = (Option<DateTime<Utc>>, Option<DateTime<Utc>>, Vec<String>, Vec<String>);

fn decode_row(
    discovered: Option<String>,
    published: Option<String>,
    countries: &str,
    ttps: &str,
) -> Result<DecodedRow, StoreError> {
    Ok((
        discovered.as_deref().map(parse_ts).transpose()?,
        published.as_deref().map(parse_ts).transpose()?,
        serde_json::from_str(countries)?,
        serde_json::from_str(ttps)?,
    ))
}
