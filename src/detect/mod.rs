//! Pattern detectors over incident history.
//!
//! Every detector is a pure function from the loaded incident set to zero or
//! more [`Candidate`]s. Detectors never touch storage; thresholds arrive
//! through [`DetectorContext`].

pub mod anomaly;
pub mod campaign;
pub mod cooccurrence;
pub mod engine;
pub mod geographic;
pub mod scoring;
pub mod temporal;

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DetectionConfig;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("invalid detector configuration: {0}")]
    InvalidConfig(String),
}

/// A single threat incident as seen by the detectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<String>,
    pub actor_name: Option<String>,
    pub sector: Option<String>,
    #[serde(default)]
    pub target_countries: Vec<String>,
    #[serde(default)]
    pub ttps: Vec<String>,
}

impl Incident {
    /// Actor identifier, treating an empty string as absent.
    pub fn actor_key(&self) -> Option<&str> {
        non_empty(self.actor_id.as_deref())
    }

    pub fn sector_key(&self) -> Option<&str> {
        non_empty(self.sector.as_deref())
    }

    /// Display name only; never falls back to the id.
    pub fn actor_name_key(&self) -> Option<&str> {
        non_empty(self.actor_name.as_deref())
    }

    /// Best human-readable label for the actor: name, then id.
    pub fn actor_label(&self) -> Option<&str> {
        non_empty(self.actor_name.as_deref()).or_else(|| self.actor_key())
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// `now` minus `days`, saturating at the earliest representable instant.
pub fn days_before(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    chrono::Duration::try_days(days)
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Everything a detector may read besides the incidents themselves.
#[derive(Debug, Clone)]
pub struct DetectorContext<'a> {
    /// Reference instant for trailing windows. Fixed for the whole run.
    pub now: DateTime<Utc>,
    /// Analysis window in days the incidents were loaded for.
    pub window_days: u32,
    pub config: &'a DetectionConfig,
}

// ---------------------------------------------------------------------------
// Pattern types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternType {
    ActorSector,
    ActorTechnique,
    SectorTechnique,
    Geographic,
    Campaign,
    TemporalCluster,
    Anomaly,
}

impl PatternType {
    pub const ALL: [PatternType; 7] = [
        PatternType::ActorSector,
        PatternType::ActorTechnique,
        PatternType::SectorTechnique,
        PatternType::Geographic,
        PatternType::Campaign,
        PatternType::TemporalCluster,
        PatternType::Anomaly,
    ];

    /// Name stored in the `pattern_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::ActorSector => "ACTOR_SECTOR",
            PatternType::ActorTechnique => "ACTOR_TECHNIQUE",
            PatternType::SectorTechnique => "SECTOR_TECHNIQUE",
            PatternType::Geographic => "GEOGRAPHIC",
            PatternType::Campaign => "CAMPAIGN",
            PatternType::TemporalCluster => "TEMPORAL_CLUSTER",
            PatternType::Anomaly => "ANOMALY",
        }
    }

    /// Lower-case prefix used in pattern keys.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            PatternType::ActorSector => "actor_sector",
            PatternType::ActorTechnique => "actor_technique",
            PatternType::SectorTechnique => "sector_technique",
            PatternType::Geographic => "geographic",
            PatternType::Campaign => "campaign",
            PatternType::TemporalCluster => "temporal_cluster",
            PatternType::Anomaly => "anomaly",
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatternType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PatternType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s) || t.key_prefix() == s)
            .ok_or_else(|| format!("unknown pattern type '{s}'"))
    }
}

/// Direction of a daily volume anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Spike,
    Drop,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Spike => f.write_str("spike"),
            Direction::Drop => f.write_str("drop"),
        }
    }
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// Identity fields and payload of a detected regularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum PatternDetail {
    ActorSector {
        actor_id: String,
        actor_name: Option<String>,
        sector: String,
        occurrences: usize,
    },
    ActorTechnique {
        actor_id: String,
        actor_name: Option<String>,
        technique: String,
        occurrences: usize,
    },
    SectorTechnique {
        sector: String,
        technique: String,
        occurrences: usize,
    },
    Geographic {
        country: String,
        occurrences: usize,
        actors: Vec<String>,
    },
    Campaign {
        actor_id: String,
        actor_name: Option<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        incident_count: usize,
        sectors: Vec<String>,
        techniques: Vec<String>,
    },
    TemporalCluster {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        incident_count: usize,
        actors: Vec<String>,
        sectors: Vec<String>,
    },
    Anomaly {
        date: NaiveDate,
        direction: Direction,
        actual_count: usize,
        expected_count: i64,
        z_score: f64,
        actors: Vec<String>,
        sectors: Vec<String>,
    },
}

impl PatternDetail {
    pub fn pattern_type(&self) -> PatternType {
        match self {
            PatternDetail::ActorSector { .. } => PatternType::ActorSector,
            PatternDetail::ActorTechnique { .. } => PatternType::ActorTechnique,
            PatternDetail::SectorTechnique { .. } => PatternType::SectorTechnique,
            PatternDetail::Geographic { .. } => PatternType::Geographic,
            PatternDetail::Campaign { .. } => PatternType::Campaign,
            PatternDetail::TemporalCluster { .. } => PatternType::TemporalCluster,
            PatternDetail::Anomaly { .. } => PatternType::Anomaly,
        }
    }

    /// Number of incidents backing the pattern.
    pub fn occurrences(&self) -> usize {
        match self {
            PatternDetail::ActorSector { occurrences, .. }
            | PatternDetail::ActorTechnique { occurrences, .. }
            | PatternDetail::SectorTechnique { occurrences, .. }
            | PatternDetail::Geographic { occurrences, .. } => *occurrences,
            PatternDetail::Campaign { incident_count, .. }
            | PatternDetail::TemporalCluster { incident_count, .. } => *incident_count,
            PatternDetail::Anomaly { actual_count, .. } => *actual_count,
        }
    }
}

/// An in-memory detection result. Built fresh every run, never persisted as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(flatten)]
    pub detail: PatternDetail,
    pub confidence: f64,
    pub description: String,
}

impl Candidate {
    /// Build a candidate, clamping `confidence` into `[0, 1]`.
    pub fn new(detail: PatternDetail, confidence: f64, description: impl Into<String>) -> Self {
        Self {
            detail,
            confidence: scoring::clamp_confidence(confidence),
            description: description.into(),
        }
    }

    pub fn pattern_type(&self) -> PatternType {
        self.detail.pattern_type()
    }

    pub fn occurrences(&self) -> usize {
        self.detail.occurrences()
    }

    /// JSON stored in the `data` column. The payload holds only strings,
    /// numbers and timestamps, so serialization does not fail in practice.
    pub fn to_data(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Stable descending sort: equal metrics keep their first-seen order.
pub(crate) fn rank_descending<T, K, F>(items: &mut [T], metric: F)
where
    K: PartialOrd,
    F: Fn(&T) -> K,
{
    items.sort_by(|a, b| metric(b).partial_cmp(&metric(a)).unwrap_or(Ordering::Equal));
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn confidence_is_clamped_on_construction() {
        let detail = PatternDetail::SectorTechnique {
            sector: "energy".into(),
            technique: "T1486".into(),
            occurrences: 40,
        };
        assert_eq!(Candidate::new(detail.clone(), 4.0, "x").confidence, 1.0);
        assert_eq!(Candidate::new(detail.clone(), -0.5, "x").confidence, 0.0);
        assert_eq!(Candidate::new(detail, f64::NAN, "x").confidence, 0.0);
    }

    #[test]
    fn data_is_tagged_camel_case_json() {
        let candidate = Candidate::new(
            PatternDetail::ActorSector {
                actor_id: "a1".into(),
                actor_name: Some("LockBit".into()),
                sector: "healthcare".into(),
                occurrences: 4,
            },
            0.4,
            "LockBit hit healthcare 4 times",
        );
        let value: serde_json::Value = serde_json::from_str(&candidate.to_data()).unwrap();
        assert_eq!(value["type"], "ACTOR_SECTOR");
        assert_eq!(value["actorId"], "a1");
        assert_eq!(value["occurrences"], 4);
        assert_eq!(value["confidence"], 0.4);
    }

    #[test]
    fn empty_identity_fields_count_as_missing() {
        let mut i = incident("1", at(0, 0));
        i.actor_id = Some(String::new());
        i.sector = Some(String::new());
        assert_eq!(i.actor_key(), None);
        assert_eq!(i.sector_key(), None);
        assert_eq!(i.actor_label(), None);
    }

    #[test]
    fn days_before_saturates_instead_of_overflowing() {
        assert_eq!(days_before(at(10, 0), 3), at(7, 0));
        assert_eq!(days_before(at(10, 0), i64::from(u32::MAX)), DateTime::<Utc>::MIN_UTC);
        assert_eq!(days_before(at(10, 0), i64::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn actor_name_key_ignores_the_id() {
        let mut i = incident("1", at(0, 0));
        i.actor_id = Some("a1".into());
        assert_eq!(i.actor_name_key(), None);
        assert_eq!(i.actor_label(), Some("a1"));
        i.actor_name = Some("Akira".into());
        assert_eq!(i.actor_name_key(), Some("Akira"));
    }

    #[test]
    fn pattern_type_parses_both_spellings() {
        assert_eq!("CAMPAIGN".parse::<PatternType>().unwrap(), PatternType::Campaign);
        assert_eq!("temporal_cluster".parse::<PatternType>().unwrap(), PatternType::TemporalCluster);
        assert!("nope".parse::<PatternType>().is_err());
    }

    #[test]
    fn ranking_is_stable_for_ties() {
        let mut items = vec![("a", 1), ("b", 3), ("c", 1), ("d", 3)];
        rank_descending(&mut items, |i| i.1);
        assert_eq!(items, vec![("b", 3), ("d", 3), ("a", 1), ("c", 1)]);
    }
}
