use std::collections::{BTreeMap, BTreeSet};

use crate::delta::CohortRules;
use crate::models::{Cohort, DeltaRecord, RankStatistics, StatisticsSummary, Summary};

pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    let rounded = (value * factor).round() / factor;
    // Avoid printing "-0" for tiny negative means.
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

pub fn mean(values: &[f64], precision: u32) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let total: f64 = values.iter().sum();
    Some(round_to(total / values.len() as f64, precision))
}

/// Middle value, or the average of the two middle values for even counts.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub fn summarize(values: &[f64], precision: u32) -> Summary {
    Summary {
        count: values.len(),
        mean: mean(values, precision),
        median: median(values),
    }
}

/// One bucket per rank in `vocabulary`; deltas whose rank is outside the
/// vocabulary are left out of every bucket.
pub fn aggregate_by_rank(
    deltas: &[DeltaRecord],
    vocabulary: &[String],
    precision: u32,
) -> BTreeMap<String, RankStatistics> {
    let mut buckets: BTreeMap<&str, Vec<f64>> = vocabulary
        .iter()
        .map(|rank| (rank.as_str(), Vec::new()))
        .collect();

    for record in deltas {
        if let Some(bucket) = buckets.get_mut(record.rank.as_str()) {
            bucket.push(record.delta);
        }
    }

    buckets
        .into_iter()
        .map(|(rank, values)| (rank.to_owned(), summarize(&values, precision)))
        .collect()
}

pub fn aggregate_by_cohort(
    deltas: &[DeltaRecord],
    rules: &CohortRules,
    precision: u32,
) -> BTreeMap<Cohort, Summary> {
    let mut buckets: BTreeMap<Cohort, Vec<f64>> =
        Cohort::ALL.iter().map(|cohort| (*cohort, Vec::new())).collect();

    for record in deltas {
        for cohort in rules.cohorts_of(record) {
            buckets.entry(cohort).or_default().push(record.delta);
        }
    }

    buckets
        .into_iter()
        .map(|(cohort, values)| (cohort, summarize(&values, precision)))
        .collect()
}

pub fn summarize_run(
    deltas: &[DeltaRecord],
    vocabulary: &[String],
    rules: &CohortRules,
    precision: u32,
) -> StatisticsSummary {
    let values: Vec<f64> = deltas.iter().map(|record| record.delta).collect();
    StatisticsSummary {
        net: values.iter().sum(),
        overall: summarize(&values, precision),
        by_rank: aggregate_by_rank(deltas, vocabulary, precision),
        by_cohort: aggregate_by_cohort(deltas, rules, precision),
    }
}

/// Ranks present in the deltas but missing from `vocabulary`.
pub fn unbucketed_ranks<'a>(
    deltas: &'a [DeltaRecord],
    vocabulary: &[String],
) -> BTreeSet<&'a str> {
    deltas
        .iter()
        .map(|record| record.rank.as_str())
        .filter(|rank| !vocabulary.iter().any(|known| known == *rank))
        .collect()
}
