//! Daily volume anomalies against a trailing baseline.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use super::scoring::{distinct, saturating_confidence, TimeSeries};
use super::{
    days_before, rank_descending, Candidate, DetectError, DetectorContext, Direction, Incident,
    PatternDetail,
};

/// |z| at which confidence saturates.
const Z_SATURATION: f64 = 4.0;

#[derive(Default)]
struct DayBucket<'a> {
    count: usize,
    actors: Vec<&'a str>,
    sectors: Vec<&'a str>,
}

/// Bucket the trailing baseline per calendar day (UTC) and flag days whose
/// count deviates from the mean by more than `anomaly_z_threshold` standard
/// deviations. Only days with at least one incident form the baseline.
pub fn detect_anomalies(
    incidents: &[Incident],
    ctx: &DetectorContext<'_>,
) -> Result<Vec<Candidate>, DetectError> {
    let baseline_days = ctx.config.anomaly_baseline_days.min(ctx.window_days);
    if baseline_days == 0 {
        return Ok(Vec::new());
    }
    let since = days_before(ctx.now, i64::from(baseline_days));

    let mut days: BTreeMap<NaiveDate, DayBucket<'_>> = BTreeMap::new();
    for incident in incidents.iter().filter(|i| i.occurred_at >= since) {
        let bucket = days.entry(incident.occurred_at.date_naive()).or_default();
        bucket.count += 1;
        if let Some(actor) = incident.actor_name_key() {
            bucket.actors.push(actor);
        }
        if let Some(sector) = incident.sector_key() {
            bucket.sectors.push(sector);
        }
    }

    let series = TimeSeries::new(days.values().map(|b| b.count as f64).collect());
    let mean = series.mean();
    let max_listed = Some(ctx.config.max_listed_values);

    let mut candidates = Vec::new();
    for (date, bucket) in &days {
        let z = series.z_score(bucket.count as f64);
        if z.abs() <= ctx.config.anomaly_z_threshold {
            continue;
        }
        let direction = if z > 0.0 { Direction::Spike } else { Direction::Drop };
        let expected = mean.round() as i64;
        let description = format!(
            "{direction} on {date}: {} incidents against an expected {expected} (z = {:.1})",
            bucket.count, z
        );

        candidates.push(Candidate::new(
            PatternDetail::Anomaly {
                date: *date,
                direction,
                actual_count: bucket.count,
                expected_count: expected,
                z_score: (z * 10.0).round() / 10.0,
                actors: distinct(bucket.actors.iter().copied(), max_listed),
                sectors: distinct(bucket.sectors.iter().copied(), max_listed),
            },
            saturating_confidence(z.abs(), Z_SATURATION),
            description,
        ));
    }

    rank_descending(&mut candidates, |c| match &c.detail {
        PatternDetail::Anomaly { z_score, .. } => z_score.abs(),
        _ => 0.0,
    });
    Ok(candidates)
}
