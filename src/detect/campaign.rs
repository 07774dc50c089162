//! Campaign detection: bursts of activity by one actor without a long pause.

use std::collections::HashMap;

use chrono::Duration;

use super::scoring::{distinct, saturating_confidence};
use super::{rank_descending, Candidate, DetectError, DetectorContext, Incident, PatternDetail};

const CAMPAIGN_SATURATION: f64 = 10.0;

/// Split each actor's timeline into runs separated by gaps of at least
/// `campaign_gap_days`, and report every run with enough incidents.
pub fn detect_campaigns(
    incidents: &[Incident],
    ctx: &DetectorContext<'_>,
) -> Result<Vec<Candidate>, DetectError> {
    let days = ctx.config.campaign_gap_days;
    let gap = Duration::try_days(days)
        .filter(|_| days > 0)
        .ok_or_else(|| DetectError::InvalidConfig(format!("campaign gap out of range: {days} days")))?;

    let mut candidates = Vec::new();
    for (actor_id, mut timeline) in group_by_actor(incidents) {
        timeline.sort_by_key(|i| i.occurred_at);

        for run in split_runs(&timeline, gap) {
            if run.len() >= ctx.config.min_occurrences {
                candidates.push(campaign_candidate(actor_id, run, ctx.config.max_listed_values));
            }
        }
    }

    rank_descending(&mut candidates, Candidate::occurrences);
    Ok(candidates)
}

/// Incidents per actor id, actors in first-seen order.
fn group_by_actor(incidents: &[Incident]) -> Vec<(&str, Vec<&Incident>)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, Vec<&Incident>)> = Vec::new();
    for incident in incidents {
        let Some(actor) = incident.actor_key() else {
            continue;
        };
        let slot = *index.entry(actor).or_insert_with(|| {
            groups.push((actor, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(incident);
    }
    groups
}

/// Walk a time-sorted timeline, cutting whenever the gap reaches `gap`.
/// The trailing run is flushed as well.
fn split_runs<'a>(timeline: &[&'a Incident], gap: Duration) -> Vec<Vec<&'a Incident>> {
    let mut runs = Vec::new();
    let mut current: Vec<&Incident> = Vec::new();
    for &incident in timeline {
        if let Some(prev) = current.last() {
            if incident.occurred_at - prev.occurred_at >= gap {
                runs.push(std::mem::take(&mut current));
            }
        }
        current.push(incident);
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

fn campaign_candidate(actor_id: &str, run: Vec<&Incident>, max_listed: usize) -> Candidate {
    // Non-empty by construction.
    let start = run[0].occurred_at;
    let end = run[run.len() - 1].occurred_at;
    let actor_name = run
        .iter()
        .find_map(|i| i.actor_name.as_deref().filter(|n| !n.is_empty()))
        .map(str::to_string);
    let sectors = distinct(run.iter().filter_map(|i| i.sector_key()), None);
    let techniques = distinct(
        run.iter().flat_map(|i| i.ttps.iter().map(String::as_str)),
        Some(max_listed),
    );

    let label = actor_name.as_deref().unwrap_or(actor_id);
    let description = format!(
        "{label} campaign: {} incidents between {} and {}",
        run.len(),
        start.date_naive(),
        end.date_naive()
    );

    Candidate::new(
        PatternDetail::Campaign {
            actor_id: actor_id.to_string(),
            actor_name,
            start,
            end,
            incident_count: run.len(),
            sectors,
            techniques,
        },
        saturating_confidence(run.len() as f64, CAMPAIGN_SATURATION),
        description,
    )
}
