//! Canonical identity strings for candidates.
//!
//! A key depends only on the identity fields of a pattern, never on counts or
//! confidence, so the same regularity maps to the same stored row run after run.
//! Campaign and temporal-cluster keys are truncated to the start date: two
//! runs of the same actor starting on the same UTC day share a key.

use std::fmt;

use crate::detect::{Candidate, PatternDetail};

/// Characters of serialized payload kept in a coarse key.
const COARSE_KEY_CHARS: usize = 50;

/// Identity of a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatternKey {
    /// Built from identity fields only.
    Exact(String),
    /// Prefix of the serialized payload. Collision-prone and unstable across
    /// count changes; not trustworthy for exact deduplication.
    Coarse(String),
}

impl PatternKey {
    pub fn as_str(&self) -> &str {
        match self {
            PatternKey::Exact(k) | PatternKey::Coarse(k) => k,
        }
    }

    pub fn into_string(self) -> String {
        match self {
            PatternKey::Exact(k) | PatternKey::Coarse(k) => k,
        }
    }

    pub fn is_coarse(&self) -> bool {
        matches!(self, PatternKey::Coarse(_))
    }
}

impl fmt::Display for PatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the key for `candidate`. Total and infallible.
pub fn pattern_key(candidate: &Candidate) -> PatternKey {
    let prefix = candidate.pattern_type().key_prefix();
    match &candidate.detail {
        PatternDetail::ActorSector { actor_id, sector, .. } => {
            PatternKey::Exact(format!("{prefix}:{actor_id}:{sector}"))
        }
        PatternDetail::ActorTechnique {
            actor_id, technique, ..
        } => PatternKey::Exact(format!("{prefix}:{actor_id}:{technique}")),
        PatternDetail::Geographic { country, .. } => PatternKey::Exact(format!("{prefix}:{country}")),
        PatternDetail::Campaign { actor_id, start, .. } => {
            PatternKey::Exact(format!("{prefix}:{actor_id}:{}", start.date_naive()))
        }
        PatternDetail::TemporalCluster { start, .. } => {
            PatternKey::Exact(format!("{prefix}:{}", start.date_naive()))
        }
        PatternDetail::Anomaly { date, direction, .. } => {
            PatternKey::Exact(format!("{prefix}:{date}:{direction}"))
        }
        detail @ PatternDetail::SectorTechnique { .. } => coarse_key(prefix, detail),
    }
}

fn coarse_key(prefix: &str, detail: &PatternDetail) -> PatternKey {
    let serialized = serde_json::to_string(detail).unwrap_or_default();
    let head: String = serialized.chars().take(COARSE_KEY_CHARS).collect();
    PatternKey::Coarse(format!("{prefix}:{head}"))
}
