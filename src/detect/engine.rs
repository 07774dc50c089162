use tracing::{debug, info, warn};

use super::{
    anomaly, campaign, cooccurrence, geographic, temporal, Candidate, DetectError, DetectorContext,
    Incident,
};

/// Function signature for a pattern detector.
pub type DetectorFn = fn(&[Incident], &DetectorContext<'_>) -> Result<Vec<Candidate>, DetectError>;

/// A registered detector.
pub struct DetectorEntry {
    pub name: &'static str,
    pub detector: DetectorFn,
}

/// What one detector produced during a run.
#[derive(Debug)]
pub struct DetectorOutcome {
    pub name: &'static str,
    pub candidates: Vec<Candidate>,
    /// Set when the detector failed; it then contributes no candidates.
    pub error: Option<String>,
}

/// Ordered registry of detectors, run one after another over the same incidents.
#[derive(Default)]
pub struct DetectorBank {
    detectors: Vec<DetectorEntry>,
}

impl DetectorBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &'static str, detector: DetectorFn) {
        self.detectors.push(DetectorEntry { name, detector });
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name).collect()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Run every detector. A failing detector is logged and yields nothing;
    /// the others still run.
    pub fn run_all(&self, incidents: &[Incident], ctx: &DetectorContext<'_>) -> Vec<DetectorOutcome> {
        info!(
            detectors = self.detectors.len(),
            incidents = incidents.len(),
            "Running detector bank"
        );

        self.detectors
            .iter()
            .map(|entry| match (entry.detector)(incidents, ctx) {
                Ok(candidates) => {
                    debug!(detector = entry.name, candidates = candidates.len(), "Detector finished");
                    DetectorOutcome {
                        name: entry.name,
                        candidates,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(detector = entry.name, error = %e, "Detector failed, skipping");
                    DetectorOutcome {
                        name: entry.name,
                        candidates: Vec::new(),
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect()
    }
}

/// Bank with every built-in detector registered.
pub fn default_bank() -> DetectorBank {
    let mut bank = DetectorBank::new();
    bank.register("actor_sector", cooccurrence::detect_actor_sector);
    bank.register("actor_technique", cooccurrence::detect_actor_technique);
    bank.register("geographic", geographic::detect_geographic);
    bank.register("campaign", campaign::detect_campaigns);
    bank.register("temporal_cluster", temporal::detect_temporal_clusters);
    bank.register("anomaly", anomaly::detect_anomalies);
    bank
}
