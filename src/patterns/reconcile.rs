//! Pure diff between this run's candidates and the stored pattern snapshot.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::warn;

use super::key::{pattern_key, PatternKey};
use super::{NewPattern, PatternStatus, PatternSummary, PatternUpdate};
use crate::detect::Candidate;

/// A candidate paired with its identity key.
#[derive(Debug, Clone)]
pub struct KeyedCandidate {
    pub key: PatternKey,
    pub candidate: Candidate,
}

/// Result of collapsing candidates that share a key within one run.
#[derive(Debug, Default)]
pub struct Coalesced {
    pub candidates: Vec<KeyedCandidate>,
    /// Candidates dropped because an earlier one already claimed their key.
    pub duplicates: usize,
    /// Surviving candidates whose key is the coarse fallback.
    pub coarse: usize,
}

/// Write instruction for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Insert(NewPattern),
    Update {
        id: i64,
        pattern_key: String,
        update: PatternUpdate,
    },
}

/// Key every candidate and keep only the first one per key. Detectors emit
/// candidates best-first, so the survivor is the highest-ranked one.
pub fn coalesce(candidates: impl IntoIterator<Item = Candidate>) -> Coalesced {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Coalesced::default();

    for candidate in candidates {
        let key = pattern_key(&candidate);
        if !seen.insert(key.as_str().to_string()) {
            warn!(pattern_key = %key, "Duplicate pattern key within run, dropping later candidate");
            out.duplicates += 1;
            continue;
        }
        if key.is_coarse() {
            warn!(
                pattern_key = %key,
                pattern_type = %candidate.pattern_type(),
                "Pattern keyed by coarse fallback; deduplication is approximate"
            );
            out.coarse += 1;
        }
        out.candidates.push(KeyedCandidate { key, candidate });
    }
    out
}

/// Decide insert or update for each keyed candidate against `existing`.
/// Exactly one instruction per candidate; nothing is ever deleted or decremented.
pub fn reconcile(
    candidates: &[KeyedCandidate],
    existing: &[PatternSummary],
    now: DateTime<Utc>,
) -> Vec<Instruction> {
    let by_key: HashMap<&str, &PatternSummary> = existing
        .iter()
        .map(|p| (p.pattern_key.as_str(), p))
        .collect();

    candidates
        .iter()
        .map(|keyed| {
            let candidate = &keyed.candidate;
            match by_key.get(keyed.key.as_str()) {
                Some(stored) => Instruction::Update {
                    id: stored.id,
                    pattern_key: stored.pattern_key.clone(),
                    update: PatternUpdate {
                        data: candidate.to_data(),
                        confidence: candidate.confidence,
                        last_detected: now,
                        detection_count: stored.detection_count.saturating_add(1),
                    },
                },
                None => Instruction::Insert(NewPattern {
                    pattern_type: candidate.pattern_type(),
                    pattern_key: keyed.key.as_str().to_string(),
                    data: candidate.to_data(),
                    confidence: candidate.confidence,
                    first_detected: now,
                    last_detected: now,
                    detection_count: 1,
                    status: PatternStatus::Active,
                }),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::test_support::at;
    use crate::detect::{PatternDetail, PatternType};

    fn geo(country: &str, occurrences: usize) -> Candidate {
        Candidate::new(
            PatternDetail::Geographic {
                country: country.into(),
                occurrences,
                actors: vec![],
            },
            occurrences as f64 / 15.0,
            format!("{country} x{occurrences}"),
        )
    }

    #[test]
    fn new_keys_become_inserts() {
        let keyed = coalesce(vec![geo("Italy", 4)]);
        let out = reconcile(&keyed.candidates, &[], at(1, 0));
        assert_eq!(out.len(), 1);
        match &out[0] {
            Instruction::Insert(p) => {
                assert_eq!(p.pattern_type, PatternType::Geographic);
                assert_eq!(p.pattern_key, "geographic:Italy");
                assert_eq!(p.detection_count, 1);
                assert_eq!(p.first_detected, at(1, 0));
                assert_eq!(p.last_detected, at(1, 0));
                assert_eq!(p.status, PatternStatus::Active);
            }
            other => panic!("expected insert, got {other:?}"),
        }
    }

    #[test]
    fn known_keys_become_updates_with_incremented_count() {
        let existing = vec![PatternSummary {
            id: 42,
            pattern_key: "geographic:Italy".into(),
            detection_count: 6,
        }];
        let keyed = coalesce(vec![geo("Italy", 9), geo("Spain", 3)]);
        let out = reconcile(&keyed.candidates, &existing, at(2, 0));

        assert_eq!(out.len(), 2);
        match &out[0] {
            Instruction::Update { id, update, .. } => {
                assert_eq!(*id, 42);
                assert_eq!(update.detection_count, 7);
                assert_eq!(update.last_detected, at(2, 0));
                assert!((update.confidence - 0.6).abs() < 1e-9);
                assert!(update.data.contains("\"occurrences\":9"));
            }
            other => panic!("expected update, got {other:?}"),
        }
        assert!(matches!(out[1], Instruction::Insert(_)));
    }

    #[test]
    fn duplicate_keys_are_coalesced_keeping_the_first() {
        let keyed = coalesce(vec![geo("Italy", 9), geo("Italy", 4)]);
        assert_eq!(keyed.duplicates, 1);
        assert_eq!(keyed.candidates.len(), 1);
        assert_eq!(keyed.candidates[0].candidate.occurrences(), 9);
    }

    #[test]
    fn coarse_keys_are_counted() {
        let sector_technique = Candidate::new(
            PatternDetail::SectorTechnique {
                sector: "education".into(),
                technique: "T1486".into(),
                occurrences: 3,
            },
            0.3,
            "s",
        );
        let keyed = coalesce(vec![sector_technique, geo("Italy", 3)]);
        assert_eq!(keyed.coarse, 1);
        assert_eq!(keyed.candidates.len(), 2);
    }

    #[test]
    fn empty_input_produces_nothing() {
        let existing = vec![PatternSummary {
            id: 1,
            pattern_key: "geographic:Italy".into(),
            detection_count: 2,
        }];
        assert!(reconcile(&[], &existing, at(0, 0)).is_empty());
    }
}
