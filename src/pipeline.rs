//! One detection run: load, detect, reconcile-and-write.
//!
//! The three phases run strictly in sequence. Only the two snapshot reads
//! are fatal; detector and write failures are counted in the report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::ThreatPatternsConfig;
use crate::detect::engine::DetectorBank;
use crate::detect::{days_before, DetectorContext};
use crate::patterns::reconcile::{coalesce, reconcile, Instruction};
use crate::patterns::{NewPattern, PersistedPattern};
use crate::storage::{IncidentSource, PatternStore, StoreError};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to load incidents: {0}")]
    SourceRead(#[source] StoreError),
    #[error("failed to load existing patterns: {0}")]
    PatternListRead(#[source] StoreError),
}

/// Parameters of a single run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub window_days: u32,
    pub now: DateTime<Utc>,
    /// How many of the most re-detected patterns to include in the report.
    pub top_n: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectorSummary {
    pub name: &'static str,
    pub candidates: usize,
    pub error: Option<String>,
}

/// Counters from the apply phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub failed_insert_batches: usize,
    /// Rows contained in failed insert batches.
    pub failed_inserts: usize,
    pub failed_updates: usize,
}

impl ApplyOutcome {
    pub fn failures(&self) -> usize {
        self.failed_inserts + self.failed_updates
    }
}

/// Human-facing summary of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub window_days: u32,
    pub since: DateTime<Utc>,
    pub incidents: usize,
    pub detectors: Vec<DetectorSummary>,
    pub candidates: usize,
    pub duplicate_keys: usize,
    pub coarse_keys: usize,
    pub outcome: ApplyOutcome,
    pub top_patterns: Vec<PersistedPattern>,
}

/// Run the whole pipeline against the given source and store.
pub fn run<S, P>(
    source: &S,
    store: &P,
    bank: &DetectorBank,
    config: &ThreatPatternsConfig,
    options: &RunOptions,
) -> Result<RunReport, RunError>
where
    S: IncidentSource + ?Sized,
    P: PatternStore + ?Sized,
{
    let since = days_before(options.now, i64::from(options.window_days));

    // 1. Load
    info!(window_days = options.window_days, %since, "Loading incidents");
    let incidents = source.read_incidents(since).map_err(RunError::SourceRead)?;
    info!(count = incidents.len(), "Incidents loaded");

    // 2. Detect
    let ctx = DetectorContext {
        now: options.now,
        window_days: options.window_days,
        config: &config.detection,
    };
    let outcomes = bank.run_all(&incidents, &ctx);
    let detectors: Vec<DetectorSummary> = outcomes
        .iter()
        .map(|o| DetectorSummary {
            name: o.name,
            candidates: o.candidates.len(),
            error: o.error.clone(),
        })
        .collect();
    let keyed = coalesce(outcomes.into_iter().flat_map(|o| o.candidates));
    let candidates = keyed.candidates.len();
    info!(
        candidates,
        duplicates = keyed.duplicates,
        coarse = keyed.coarse,
        "Detection finished"
    );

    // 3. Reconcile and write
    let existing = store.list_patterns().map_err(RunError::PatternListRead)?;
    let instructions = reconcile(&keyed.candidates, &existing, options.now);
    let outcome = apply(store, instructions, config.persistence.insert_batch_size);
    info!(
        inserted = outcome.inserted,
        updated = outcome.updated,
        failed = outcome.failures(),
        "Patterns written"
    );

    let top_patterns = if options.top_n == 0 {
        Vec::new()
    } else {
        store.top_patterns(options.top_n).unwrap_or_else(|e| {
            warn!(error = %e, "Could not load top patterns for the report");
            Vec::new()
        })
    };

    Ok(RunReport {
        window_days: options.window_days,
        since,
        incidents: incidents.len(),
        detectors,
        candidates,
        duplicate_keys: keyed.duplicates,
        coarse_keys: keyed.coarse,
        outcome,
        top_patterns,
    })
}

/// Apply instructions: inserts in chunks of `batch_size`, one transaction per
/// chunk, then updates one row at a time. Failures are logged and counted.
pub fn apply<P>(store: &P, instructions: Vec<Instruction>, batch_size: usize) -> ApplyOutcome
where
    P: PatternStore + ?Sized,
{
    let mut outcome = ApplyOutcome::default();
    let mut inserts: Vec<NewPattern> = Vec::new();
    let mut updates = Vec::new();
    for instruction in instructions {
        match instruction {
            Instruction::Insert(p) => inserts.push(p),
            Instruction::Update {
                id,
                pattern_key,
                update,
            } => updates.push((id, pattern_key, update)),
        }
    }

    for chunk in inserts.chunks(batch_size.max(1)) {
        match store.insert_patterns(chunk) {
            Ok(()) => outcome.inserted += chunk.len(),
            Err(e) => {
                error!(rows = chunk.len(), error = %e, "Failed to insert pattern batch");
                outcome.failed_insert_batches += 1;
                outcome.failed_inserts += chunk.len();
            }
        }
    }

    for (id, pattern_key, update) in updates {
        match store.update_pattern(id, &update) {
            Ok(()) => outcome.updated += 1,
            Err(e) => {
                error!(id, %pattern_key, error = %e, "Failed to update pattern");
                outcome.failed_updates += 1;
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::test_support::{actor_incident, at};
    use crate::detect::{Incident, PatternType};
    use crate::patterns::{PatternStatus, PatternSummary, PatternUpdate};
    use std::cell::RefCell;

    /// In-memory collaborator that can be told to fail.
    #[derive(Default)]
    struct FakeStore {
        incidents: Vec<Incident>,
        rows: RefCell<Vec<PatternSummary>>,
        fail_source: bool,
        fail_list: bool,
        fail_inserts_containing: Option<String>,
        insert_calls: RefCell<usize>,
    }

    fn sqlite_error() -> StoreError {
        StoreError::Sqlite(rusqlite::Error::InvalidQuery)
    }

    impl IncidentSource for FakeStore {
        fn read_incidents(&self, since: DateTime<Utc>) -> Result<Vec<Incident>, StoreError> {
            if self.fail_source {
                return Err(sqlite_error());
            }
            Ok(self.incidents.iter().filter(|i| i.occurred_at >= since).cloned().collect())
        }
    }

    impl PatternStore for FakeStore {
        fn list_patterns(&self) -> Result<Vec<PatternSummary>, StoreError> {
            if self.fail_list {
                return Err(sqlite_error());
            }
            Ok(self.rows.borrow().clone())
        }

        fn insert_patterns(&self, records: &[NewPattern]) -> Result<(), StoreError> {
            *self.insert_calls.borrow_mut() += 1;
            if let Some(bad) = &self.fail_inserts_containing {
                if records.iter().any(|r| r.pattern_key.contains(bad.as_str())) {
                    return Err(sqlite_error());
                }
            }
            let mut rows = self.rows.borrow_mut();
            for r in records {
                let id = rows.len() as i64 + 1;
                rows.push(PatternSummary {
                    id,
                    pattern_key: r.pattern_key.clone(),
                    detection_count: r.detection_count,
                });
            }
            Ok(())
        }

        fn update_pattern(&self, id: i64, update: &PatternUpdate) -> Result<(), StoreError> {
            let mut rows = self.rows.borrow_mut();
            let row = rows
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or(StoreError::PatternNotFound(id))?;
            row.detection_count = update.detection_count;
            Ok(())
        }

        fn top_patterns(&self, _limit: usize) -> Result<Vec<PersistedPattern>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn options() -> RunOptions {
        RunOptions {
            window_days: 90,
            now: at(10, 0),
            top_n: 5,
        }
    }

    fn healthcare_burst() -> Vec<Incident> {
        (0..10)
            .map(|n| actor_incident(&n.to_string(), at(n % 5, n), "x", "healthcare"))
            .collect()
    }

    fn insert(key: &str) -> Instruction {
        Instruction::Insert(NewPattern {
            pattern_type: PatternType::Geographic,
            pattern_key: key.into(),
            data: "{}".into(),
            confidence: 0.5,
            first_detected: at(0, 0),
            last_detected: at(0, 0),
            detection_count: 1,
            status: PatternStatus::Active,
        })
    }

    #[test]
    fn source_failure_aborts_before_detection() {
        let store = FakeStore {
            fail_source: true,
            ..FakeStore::default()
        };
        let bank = crate::detect::engine::default_bank();
        let err = run(&store, &store, &bank, &ThreatPatternsConfig::default(), &options()).unwrap_err();
        assert!(matches!(err, RunError::SourceRead(_)));
        assert_eq!(*store.insert_calls.borrow(), 0);
    }

    #[test]
    fn pattern_list_failure_aborts_before_writing() {
        let store = FakeStore {
            incidents: healthcare_burst(),
            fail_list: true,
            ..FakeStore::default()
        };
        let bank = crate::detect::engine::default_bank();
        let err = run(&store, &store, &bank, &ThreatPatternsConfig::default(), &options()).unwrap_err();
        assert!(matches!(err, RunError::PatternListRead(_)));
        assert_eq!(*store.insert_calls.borrow(), 0);
    }

    #[test]
    fn second_run_updates_instead_of_inserting() {
        let store = FakeStore {
            incidents: healthcare_burst(),
            ..FakeStore::default()
        };
        let bank = crate::detect::engine::default_bank();
        let config = ThreatPatternsConfig::default();

        let first = run(&store, &store, &bank, &config, &options()).unwrap();
        assert!(first.outcome.inserted > 0);
        assert_eq!(first.outcome.updated, 0);

        let second = run(&store, &store, &bank, &config, &options()).unwrap();
        assert_eq!(second.outcome.inserted, 0);
        assert_eq!(second.outcome.updated, first.outcome.inserted);
        assert!(store.rows.borrow().iter().all(|r| r.detection_count == 2));
    }

    #[test]
    fn inserts_are_chunked_and_failed_chunks_counted() {
        let store = FakeStore {
            fail_inserts_containing: Some("bad".into()),
            ..FakeStore::default()
        };
        let instructions = vec![insert("g:1"), insert("g:2"), insert("g:bad"), insert("g:4"), insert("g:5")];

        let outcome = apply(&store, instructions, 2);
        assert_eq!(*store.insert_calls.borrow(), 3);
        assert_eq!(outcome.inserted, 3);
        assert_eq!(outcome.failed_insert_batches, 1);
        assert_eq!(outcome.failed_inserts, 2);
    }

    #[test]
    fn failed_update_does_not_stop_the_rest() {
        let store = FakeStore::default();
        store.insert_patterns(&[NewPattern {
            pattern_type: PatternType::Geographic,
            pattern_key: "g:1".into(),
            data: "{}".into(),
            confidence: 0.5,
            first_detected: at(0, 0),
            last_detected: at(0, 0),
            detection_count: 1,
            status: PatternStatus::Active,
        }])
        .unwrap();

        let update = |id: i64| Instruction::Update {
            id,
            pattern_key: format!("g:{id}"),
            update: PatternUpdate {
                data: "{}".into(),
                confidence: 0.5,
                last_detected: at(1, 0),
                detection_count: 2,
            },
        };
        let outcome = apply(&store, vec![update(7), update(1)], 50);
        assert_eq!(outcome.failed_updates, 1);
        assert_eq!(outcome.updated, 1);
    }

    #[test]
    fn huge_window_reads_everything_without_overflow() {
        let store = FakeStore {
            incidents: healthcare_burst(),
            ..FakeStore::default()
        };
        let bank = crate::detect::engine::default_bank();
        let options = RunOptions {
            window_days: u32::MAX,
            ..options()
        };

        let report = run(&store, &store, &bank, &ThreatPatternsConfig::default(), &options).unwrap();
        assert_eq!(report.since, DateTime::<Utc>::MIN_UTC);
        assert_eq!(report.incidents, 10);
        assert!(report.detectors.iter().all(|d| d.error.is_none()));
    }

    #[test]
    fn oversized_temporal_window_fails_only_that_detector() {
        let store = FakeStore {
            incidents: healthcare_burst(),
            ..FakeStore::default()
        };
        let mut config = ThreatPatternsConfig::default();
        config.detection.temporal_window_hours = i64::MAX;
        let bank = crate::detect::engine::default_bank();

        let report = run(&store, &store, &bank, &config, &options()).unwrap();
        let temporal = report.detectors.iter().find(|d| d.name == "temporal_cluster").unwrap();
        assert!(temporal.error.is_some());
        assert!(report.outcome.inserted > 0);
    }

    #[test]
    fn failing_detector_is_reported_not_fatal() {
        let store = FakeStore {
            incidents: healthcare_burst(),
            ..FakeStore::default()
        };
        let mut config = ThreatPatternsConfig::default();
        config.detection.campaign_gap_days = 0;
        let bank = crate::detect::engine::default_bank();

        let report = run(&store, &store, &bank, &config, &options()).unwrap();
        let campaign = report.detectors.iter().find(|d| d.name == "campaign").unwrap();
        assert!(campaign.error.is_some());
        assert_eq!(campaign.candidates, 0);
        let actor_sector = report.detectors.iter().find(|d| d.name == "actor_sector").unwrap();
        assert_eq!(actor_sector.candidates, 1);
    }
}
