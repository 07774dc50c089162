//! Persisted patterns: identity keys and reconciliation against the store.

pub mod key;
pub mod reconcile;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::detect::PatternType;

/// Lifecycle of a persisted pattern. Detection only ever writes `Active`;
/// rows archived out of band are read back as `Archived` and keep that
/// status when detected again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternStatus {
    Active,
    Archived,
}

impl PatternStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternStatus::Active => "active",
            PatternStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for PatternStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatternStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PatternStatus::Active),
            "archived" => Ok(PatternStatus::Archived),
            other => Err(format!("unknown pattern status '{other}'")),
        }
    }
}

/// Minimal projection of a stored pattern, enough to reconcile against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSummary {
    pub id: i64,
    pub pattern_key: String,
    pub detection_count: i64,
}

/// A pattern seen for the first time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPattern {
    pub pattern_type: PatternType,
    pub pattern_key: String,
    pub data: String,
    pub confidence: f64,
    pub first_detected: DateTime<Utc>,
    pub last_detected: DateTime<Utc>,
    pub detection_count: i64,
    pub status: PatternStatus,
}

/// Fields rewritten when a stored pattern is detected again.
/// `first_detected` and `status` are deliberately absent.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternUpdate {
    pub data: String,
    pub confidence: f64,
    pub last_detected: DateTime<Utc>,
    pub detection_count: i64,
}

/// A full stored row.
#[derive(Debug, Clone, Serialize)]
pub struct PersistedPattern {
    pub id: i64,
    /// Kept as text: rows may carry types written by other producers.
    pub pattern_type: String,
    pub pattern_key: String,
    pub data: serde_json::Value,
    pub confidence: f64,
    pub first_detected: DateTime<Utc>,
    pub last_detected: DateTime<Utc>,
    pub detection_count: i64,
    pub status: PatternStatus,
}

impl PersistedPattern {
    /// Description recorded with the last detection, if any.
    pub fn description(&self) -> Option<&str> {
        self.data.get("description").and_then(|d| d.as_str())
    }
}
