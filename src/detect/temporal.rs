//! Temporal clusters: many incidents packed into one sliding window.

use chrono::{DateTime, Duration, Utc};

use super::scoring::{distinct, saturating_confidence};
use super::{rank_descending, Candidate, DetectError, DetectorContext, Incident, PatternDetail};

const CLUSTER_SATURATION: f64 = 20.0;

/// Anchor a window of `temporal_window_hours` on every incident and report
/// windows holding at least twice `min_occurrences` incidents. A window whose
/// anchor lies within half a window of an already reported anchor is skipped.
pub fn detect_temporal_clusters(
    incidents: &[Incident],
    ctx: &DetectorContext<'_>,
) -> Result<Vec<Candidate>, DetectError> {
    let hours = ctx.config.temporal_window_hours;
    let window = Duration::try_hours(hours)
        .filter(|_| hours > 0)
        .ok_or_else(|| {
            DetectError::InvalidConfig(format!("temporal window out of range: {hours} hours"))
        })?;
    let half_window_secs = window.num_seconds() / 2;
    let threshold = ctx.config.min_occurrences.saturating_mul(2);

    let mut sorted: Vec<&Incident> = incidents.iter().collect();
    sorted.sort_by_key(|i| i.occurred_at);

    let mut anchors: Vec<DateTime<Utc>> = Vec::new();
    let mut candidates = Vec::new();

    for anchor in &sorted {
        let start = anchor.occurred_at;
        let end = start.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let lo = sorted.partition_point(|i| i.occurred_at < start);
        let hi = sorted.partition_point(|i| i.occurred_at <= end);
        let members = &sorted[lo..hi];

        if members.len() < threshold {
            continue;
        }
        if anchors
            .iter()
            .any(|a| (start - *a).num_seconds().abs() < half_window_secs)
        {
            continue;
        }
        anchors.push(start);
        candidates.push(cluster_candidate(start, members));
    }

    rank_descending(&mut candidates, Candidate::occurrences);
    Ok(candidates)
}

fn cluster_candidate(start: DateTime<Utc>, members: &[&Incident]) -> Candidate {
    let end = members.last().map(|i| i.occurred_at).unwrap_or(start);
    let actors = distinct(members.iter().filter_map(|i| i.actor_label()), None);
    let sectors = distinct(members.iter().filter_map(|i| i.sector_key()), None);
    let description = format!(
        "{} incidents within {} hours starting {}",
        members.len(),
        (end - start).num_hours(),
        start.format("%Y-%m-%d %H:%M UTC")
    );

    Candidate::new(
        PatternDetail::TemporalCluster {
            start,
            end,
            incident_count: members.len(),
            actors,
            sectors,
        },
        saturating_confidence(members.len() as f64, CLUSTER_SATURATION),
        description,
    )
}
