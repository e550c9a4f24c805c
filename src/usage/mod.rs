//! Usage summarization over provider time series.
//!
//! Statistics absent from a datapoint are skipped rather than read as zero,
//! so a summary distinguishes "no data" from "zero usage". Callers that need
//! a display value use [`UsageSummary::zero_filled`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::models::{AggregationPolicy, Combinator, Datapoint, UsageSummary};

/// Summarize a series under an aggregation policy.
///
/// `last` is the selected statistic of the latest datapoint that carries it.
pub fn summarize(datapoints: &[Datapoint], policy: AggregationPolicy) -> UsageSummary {
    let mut sorted: Vec<&Datapoint> = datapoints.iter().collect();
    sorted.sort_by_key(|d| d.timestamp);

    let (avg_stat, min_stat, max_stat): (Stat, Stat, Stat) = match policy {
        AggregationPolicy::Average => (average, minimum, maximum),
        AggregationPolicy::Maximum => (maximum, maximum, maximum),
        AggregationPolicy::Minimum => (minimum, minimum, minimum),
        AggregationPolicy::Sum => (sum, sum, sum),
    };

    let avg = mean(sorted.iter().filter_map(|d| avg_stat(d)));
    let min = sorted
        .iter()
        .filter_map(|d| min_stat(d))
        .reduce(f64::min);
    let max = sorted
        .iter()
        .filter_map(|d| max_stat(d))
        .reduce(f64::max);
    let last = sorted.iter().rev().find_map(|d| avg_stat(d));

    UsageSummary {
        avg,
        min,
        max,
        last,
    }
}

type Stat = fn(&Datapoint) -> Option<f64>;

fn average(d: &Datapoint) -> Option<f64> {
    d.average
}

fn minimum(d: &Datapoint) -> Option<f64> {
    d.minimum
}

fn maximum(d: &Datapoint) -> Option<f64> {
    d.maximum
}

fn sum(d: &Datapoint) -> Option<f64> {
    d.sum
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Align two series by timestamp and combine overlapping points.
///
/// Average and sum statistics go through `combinator`; maximum and minimum
/// go through `max`/`min`. A statistic present on only one side passes through.
/// Output is sorted by ascending timestamp with one point per timestamp.
pub fn merge(a: &[Datapoint], b: &[Datapoint], combinator: Combinator) -> Vec<Datapoint> {
    let mut merged: BTreeMap<DateTime<Utc>, Datapoint> = BTreeMap::new();

    for point in a.iter().chain(b.iter()) {
        match merged.get_mut(&point.timestamp) {
            Some(existing) => *existing = combine(existing, point, combinator),
            None => {
                merged.insert(point.timestamp, point.clone());
            }
        }
    }

    merged.into_values().collect()
}

/// Fold several series into one with the same combinator.
pub fn merge_all<'a>(
    series: impl IntoIterator<Item = &'a [Datapoint]>,
    combinator: Combinator,
) -> Vec<Datapoint> {
    series
        .into_iter()
        .fold(Vec::new(), |acc, s| merge(&acc, s, combinator))
}

fn combine(a: &Datapoint, b: &Datapoint, combinator: Combinator) -> Datapoint {
    let additive = |x: Option<f64>, y: Option<f64>| match combinator {
        Combinator::Sum => both_or_either(x, y, |x, y| x + y),
        Combinator::Average => both_or_either(x, y, |x, y| (x + y) / 2.0),
    };
    let count = |x: Option<f64>, y: Option<f64>| match combinator {
        Combinator::Sum => both_or_either(x, y, |x, y| x + y),
        Combinator::Average => both_or_either(x, y, f64::max),
    };

    Datapoint {
        timestamp: a.timestamp,
        average: additive(a.average, b.average),
        sum: additive(a.sum, b.sum),
        maximum: both_or_either(a.maximum, b.maximum, f64::max),
        minimum: both_or_either(a.minimum, b.minimum, f64::min),
        sample_count: count(a.sample_count, b.sample_count),
    }
}

fn both_or_either(x: Option<f64>, y: Option<f64>, f: impl Fn(f64, f64) -> f64) -> Option<f64> {
    match (x, y) {
        (Some(x), Some(y)) => Some(f(x, y)),
        (Some(v), None) | (None, Some(v)) => Some(v),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn ts(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
    }

    fn avg_point(minute: u32, value: f64) -> Datapoint {
        Datapoint {
            average: Some(value),
            ..Datapoint::at(ts(minute))
        }
    }

    #[test]
    fn test_summarize_skips_missing_statistics() {
        let points = vec![
            Datapoint {
                average: Some(10.0),
                maximum: Some(40.0),
                ..Datapoint::at(ts(0))
            },
            Datapoint {
                maximum: Some(90.0),
                ..Datapoint::at(ts(5))
            },
            avg_point(10, 20.0),
        ];

        let summary = summarize(&points, AggregationPolicy::Average);
        assert_eq!(summary.avg, Some(15.0));
        assert_eq!(summary.max, Some(90.0));
        assert_eq!(summary.min, None);
        assert_eq!(summary.last, Some(20.0));
    }

    #[test]
    fn test_summarize_empty_is_absent_not_zero() {
        let summary = summarize(&[], AggregationPolicy::Average);
        assert!(summary.is_empty());
        assert_eq!(summary.avg, None);

        let display = summary.zero_filled();
        assert_eq!(display.avg, Some(0.0));
        assert_eq!(display.max, Some(0.0));
    }

    #[test]
    fn test_summarize_maximum_policy_reads_maximum_statistic() {
        let points = vec![
            Datapoint {
                average: Some(10.0),
                maximum: Some(50.0),
                ..Datapoint::at(ts(0))
            },
            Datapoint {
                average: Some(12.0),
                maximum: Some(70.0),
                ..Datapoint::at(ts(1))
            },
        ];
        let summary = summarize(&points, AggregationPolicy::Maximum);
        assert_eq!(summary.avg, Some(60.0));
        assert_eq!(summary.min, Some(50.0));
        assert_eq!(summary.max, Some(70.0));
        assert_eq!(summary.last, Some(70.0));
    }

    #[test]
    fn test_summarize_last_uses_latest_timestamp_not_input_order() {
        let points = vec![avg_point(9, 3.0), avg_point(1, 7.0)];
        assert_eq!(summarize(&points, AggregationPolicy::Average).last, Some(3.0));
    }

    #[test]
    fn test_merge_disjoint_is_sorted_union() {
        let a = vec![avg_point(0, 1.0), avg_point(10, 3.0)];
        let b = vec![avg_point(5, 2.0), avg_point(15, 4.0)];

        let merged = merge(&a, &b, Combinator::Sum);
        let values: Vec<_> = merged.iter().map(|d| d.average.unwrap()).collect();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
        assert!(merged.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_merge_overlap_applies_combinator_once() {
        let a = vec![Datapoint {
            average: Some(100.0),
            maximum: Some(150.0),
            minimum: Some(50.0),
            sample_count: Some(5.0),
            ..Datapoint::at(ts(0))
        }];
        let b = vec![Datapoint {
            average: Some(40.0),
            maximum: Some(300.0),
            minimum: Some(10.0),
            sample_count: Some(5.0),
            ..Datapoint::at(ts(0))
        }];

        let summed = merge(&a, &b, Combinator::Sum);
        assert_eq!(summed.len(), 1);
        assert_eq!(summed[0].average, Some(140.0));
        assert_eq!(summed[0].maximum, Some(300.0));
        assert_eq!(summed[0].minimum, Some(10.0));
        assert_eq!(summed[0].sample_count, Some(10.0));

        let averaged = merge(&a, &b, Combinator::Average);
        assert_eq!(averaged[0].average, Some(70.0));
        assert_eq!(averaged[0].sample_count, Some(5.0));
    }

    #[test]
    fn test_merge_one_sided_statistic_passes_through() {
        let a = vec![Datapoint {
            sum: Some(600.0),
            ..Datapoint::at(ts(0))
        }];
        let b = vec![avg_point(0, 2.0)];

        let merged = merge(&a, &b, Combinator::Sum);
        assert_eq!(merged[0].sum, Some(600.0));
        assert_eq!(merged[0].average, Some(2.0));
    }

    #[test]
    fn test_merge_all_sums_three_series() {
        let a = vec![avg_point(0, 1.0)];
        let b = vec![avg_point(0, 2.0)];
        let c = vec![avg_point(0, 3.0), avg_point(1, 1.0)];

        let merged = merge_all([a.as_slice(), b.as_slice(), c.as_slice()], Combinator::Sum);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].average, Some(6.0));
    }
}
