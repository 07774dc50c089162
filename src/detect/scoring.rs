//! Scoring and grouping helpers shared by the detectors.

use std::collections::{HashMap, HashSet};

/// A simple series of per-bucket counts for statistical analysis.
pub struct TimeSeries {
    values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Population variance (divides by N).
    pub fn variance(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq_diff: f64 = self.values.iter().map(|&x| (x - mean).powi(2)).sum();
        sum_sq_diff / self.values.len() as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Z = (value - mean) / std_dev, or 0 for a flat series.
    pub fn z_score(&self, value: f64) -> f64 {
        let std = self.std_dev();
        if std == 0.0 {
            return 0.0;
        }
        (value - self.mean()) / std
    }
}

/// Clamp a raw score into `[0, 1]`. NaN maps to 0.
pub fn clamp_confidence(raw: f64) -> f64 {
    if raw.is_nan() {
        return 0.0;
    }
    raw.clamp(0.0, 1.0)
}

/// `min(1, count / saturation)`.
pub fn saturating_confidence(count: f64, saturation: f64) -> f64 {
    clamp_confidence(count / saturation)
}

/// One tallied `(first, second)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairCount {
    pub first: String,
    pub second: String,
    pub count: usize,
}

/// Two-key co-occurrence counter keyed by `"{first}|{second}"`.
/// Pairs come back in the order they were first recorded.
#[derive(Debug, Default)]
pub struct CooccurrenceCounter {
    index: HashMap<String, usize>,
    pairs: Vec<PairCount>,
}

impl CooccurrenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pair_key(first: &str, second: &str) -> String {
        format!("{first}|{second}")
    }

    /// Count one observation. Returns `false` when either key is missing or empty.
    pub fn record(&mut self, first: Option<&str>, second: Option<&str>) -> bool {
        let (Some(first), Some(second)) = (first, second) else {
            return false;
        };
        if first.is_empty() || second.is_empty() {
            return false;
        }

        let key = Self::pair_key(first, second);
        match self.index.get(&key) {
            Some(&slot) => self.pairs[slot].count += 1,
            None => {
                self.index.insert(key, self.pairs.len());
                self.pairs.push(PairCount {
                    first: first.to_string(),
                    second: second.to_string(),
                    count: 1,
                });
            }
        }
        true
    }

    pub fn count(&self, first: &str, second: &str) -> usize {
        self.index
            .get(&Self::pair_key(first, second))
            .map(|&slot| self.pairs[slot].count)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> impl Iterator<Item = &PairCount> {
        self.pairs.iter()
    }
}

/// Deduplicate non-empty values, keeping first-seen order, up to `limit` entries.
pub fn distinct<'a, I>(values: I, limit: Option<usize>) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let cap = limit.unwrap_or(usize::MAX);
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for value in values {
        if out.len() >= cap {
            break;
        }
        if !value.is_empty() && seen.insert(value) {
            out.push(value.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats() {
        let ts = TimeSeries::new(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(ts.mean(), 3.0);
        assert_eq!(ts.variance(), 2.0);
        // (10 - 3) / sqrt(2) ~ 4.95
        assert!(ts.z_score(10.0) > 4.9);
    }

    #[test]
    fn empty_series_is_zero_not_nan() {
        let ts = TimeSeries::new(Vec::new());
        assert!(ts.is_empty());
        assert_eq!(ts.mean(), 0.0);
        assert_eq!(ts.std_dev(), 0.0);
        assert_eq!(ts.z_score(3.0), 0.0);
    }

    #[test]
    fn flat_series_has_zero_z() {
        let ts = TimeSeries::new(vec![4.0; 10]);
        assert_eq!(ts.std_dev(), 0.0);
        assert_eq!(ts.z_score(4.0), 0.0);
        assert_eq!(ts.z_score(40.0), 0.0);
    }

    #[test]
    fn counter_skips_missing_keys_and_keeps_order() {
        let mut counter = CooccurrenceCounter::new();
        assert!(counter.record(Some("b"), Some("x")));
        assert!(counter.record(Some("a"), Some("y")));
        assert!(counter.record(Some("b"), Some("x")));
        assert!(!counter.record(None, Some("x")));
        assert!(!counter.record(Some("a"), Some("")));

        assert_eq!(counter.len(), 2);
        assert_eq!(counter.count("b", "x"), 2);
        assert_eq!(counter.count("a", "x"), 0);
        let order: Vec<_> = counter.pairs().map(|p| p.first.as_str()).collect();
        assert_eq!(order, vec!["b", "a"]);
    }

    #[test]
    fn distinct_keeps_first_seen_and_caps() {
        let values = ["T1", "T2", "T1", "", "T3", "T4"];
        assert_eq!(distinct(values, None), vec!["T1", "T2", "T3", "T4"]);
        assert_eq!(distinct(values, Some(2)), vec!["T1", "T2"]);
    }

    #[test]
    fn saturating_confidence_caps_at_one() {
        assert_eq!(saturating_confidence(3.0, 10.0), 0.3);
        assert_eq!(saturating_confidence(30.0, 10.0), 1.0);
    }
}
