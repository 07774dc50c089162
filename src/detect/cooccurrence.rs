//! Actor co-occurrence detectors: actor–sector and actor–technique affinities.

use std::collections::HashMap;

use super::scoring::{saturating_confidence, CooccurrenceCounter};
use super::{rank_descending, Candidate, DetectError, DetectorContext, Incident, PatternDetail};

/// Pair count at which confidence saturates.
const PAIR_SATURATION: f64 = 10.0;

/// Count incidents per (actor, sector) pair.
pub fn detect_actor_sector(
    incidents: &[Incident],
    ctx: &DetectorContext<'_>,
) -> Result<Vec<Candidate>, DetectError> {
    let mut counter = CooccurrenceCounter::new();
    for incident in incidents {
        counter.record(incident.actor_key(), incident.sector_key());
    }

    let names = actor_names(incidents);
    let mut candidates: Vec<Candidate> = counter
        .pairs()
        .filter(|pair| pair.count >= ctx.config.min_occurrences)
        .map(|pair| {
            let actor_name = names.get(pair.first.as_str()).map(|n| n.to_string());
            let label = actor_name.as_deref().unwrap_or(&pair.first);
            let description = format!(
                "{label} targeted the {} sector in {} incidents",
                pair.second, pair.count
            );
            Candidate::new(
                PatternDetail::ActorSector {
                    actor_id: pair.first.clone(),
                    actor_name,
                    sector: pair.second.clone(),
                    occurrences: pair.count,
                },
                saturating_confidence(pair.count as f64, PAIR_SATURATION),
                description,
            )
        })
        .collect();

    rank_descending(&mut candidates, Candidate::occurrences);
    Ok(candidates)
}

/// Count (actor, technique) pairs across every TTP attached to an incident.
pub fn detect_actor_technique(
    incidents: &[Incident],
    ctx: &DetectorContext<'_>,
) -> Result<Vec<Candidate>, DetectError> {
    let mut counter = CooccurrenceCounter::new();
    for incident in incidents {
        for ttp in &incident.ttps {
            counter.record(incident.actor_key(), Some(ttp.as_str()));
        }
    }

    let names = actor_names(incidents);
    let mut candidates: Vec<Candidate> = counter
        .pairs()
        .filter(|pair| pair.count >= ctx.config.min_occurrences)
        .map(|pair| {
            let actor_name = names.get(pair.first.as_str()).map(|n| n.to_string());
            let label = actor_name.as_deref().unwrap_or(&pair.first);
            let description = format!(
                "{label} used technique {} in {} incidents",
                pair.second, pair.count
            );
            Candidate::new(
                PatternDetail::ActorTechnique {
                    actor_id: pair.first.clone(),
                    actor_name,
                    technique: pair.second.clone(),
                    occurrences: pair.count,
                },
                saturating_confidence(pair.count as f64, PAIR_SATURATION),
                description,
            )
        })
        .collect();

    rank_descending(&mut candidates, Candidate::occurrences);
    Ok(candidates)
}

/// First non-empty display name seen for each actor id.
fn actor_names(incidents: &[Incident]) -> HashMap<&str, &str> {
    let mut names = HashMap::new();
    for incident in incidents {
        if let (Some(id), Some(name)) = (incident.actor_key(), incident.actor_name.as_deref()) {
            if !name.is_empty() {
                names.entry(id).or_insert(name);
            }
        }
    }
    names
}
