//! Geographic targeting: countries that keep showing up as victims.

use std::collections::HashMap;

use super::scoring::{distinct, saturating_confidence};
use super::{rank_descending, Candidate, DetectError, DetectorContext, Incident, PatternDetail};

const COUNTRY_SATURATION: f64 = 15.0;

struct CountryTally<'a> {
    country: &'a str,
    count: usize,
    actors: Vec<&'a str>,
}

/// Expand every incident's target list into a global per-country counter.
pub fn detect_geographic(
    incidents: &[Incident],
    ctx: &DetectorContext<'_>,
) -> Result<Vec<Candidate>, DetectError> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut tallies: Vec<CountryTally<'_>> = Vec::new();

    for incident in incidents {
        for country in incident.target_countries.iter().filter(|c| !c.is_empty()) {
            let slot = *index.entry(country.as_str()).or_insert_with(|| {
                tallies.push(CountryTally {
                    country: country.as_str(),
                    count: 0,
                    actors: Vec::new(),
                });
                tallies.len() - 1
            });
            let tally = &mut tallies[slot];
            tally.count += 1;
            if let Some(actor) = incident.actor_name_key() {
                tally.actors.push(actor);
            }
        }
    }

    let mut candidates: Vec<Candidate> = tallies
        .into_iter()
        .filter(|t| t.count >= ctx.config.min_occurrences)
        .map(|t| {
            let actors = distinct(t.actors.iter().copied(), None);
            let description = format!(
                "{} targeted in {} incidents by {} distinct actors",
                t.country,
                t.count,
                actors.len()
            );
            Candidate::new(
                PatternDetail::Geographic {
                    country: t.country.to_string(),
                    occurrences: t.count,
                    actors,
                },
                saturating_confidence(t.count as f64, COUNTRY_SATURATION),
                description,
            )
        })
        .collect();

    rank_descending(&mut candidates, Candidate::occurrences);
    Ok(candidates)
}
