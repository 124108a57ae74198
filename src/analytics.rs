use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate};
use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::confidence::{mean, round_to, sample_variance};
use crate::models::{AppRecord, CategorySummary, GrowthRow, SignificanceResult};

pub const DEFAULT_GROWTH_WINDOW_DAYS: i64 = 90;

#[derive(Default)]
struct CategoryAccumulator<'a> {
    app_names: BTreeSet<&'a str>,
    ratings: Vec<f64>,
    prices: Vec<f64>,
    total_reviews: u64,
}

/// Per-category descriptive statistics, largest categories first.
pub fn category_summary(records: &[AppRecord]) -> Vec<CategorySummary> {
    let mut groups: BTreeMap<&str, CategoryAccumulator> = BTreeMap::new();

    for record in records {
        let entry = groups.entry(record.category.as_str()).or_default();
        entry.app_names.insert(record.app_name.as_str());
        if let Some(rating) = record.rating {
            entry.ratings.push(rating);
        }
        entry.prices.push(record.price_usd);
        entry.total_reviews += record.review_count;
    }

    let mut summaries: Vec<CategorySummary> = groups
        .into_iter()
        .map(|(category, mut acc)| CategorySummary {
            category: category.to_string(),
            apps: acc.app_names.len(),
            avg_rating: if acc.ratings.is_empty() {
                None
            } else {
                Some(round_to(mean(&acc.ratings), 2))
            },
            median_price: median(&mut acc.prices),
            total_reviews: acc.total_reviews,
        })
        .collect();

    // stable sort keeps name order among equal app counts
    summaries.sort_by(|a, b| b.apps.cmp(&a.apps));
    summaries
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Share of each category's rows updated inside the window ending at `today`.
///
/// The ratio is `recent / (total + 1)`, so small categories can rank high;
/// rows without an update date only count toward the total.
pub fn detect_growth(records: &[AppRecord], today: NaiveDate, window_days: i64) -> Vec<GrowthRow> {
    let cutoff = today - Duration::days(window_days);
    let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();

    for record in records {
        let entry = counts.entry(record.category.as_str()).or_insert((0, 0));
        entry.1 += 1;
        if record.last_updated.is_some_and(|date| date >= cutoff) {
            entry.0 += 1;
        }
    }

    let mut rows: Vec<GrowthRow> = counts
        .into_iter()
        .map(|(category, (recent_count, total_count))| GrowthRow {
            category: category.to_string(),
            recent_count,
            total_count,
            recent_ratio: recent_count as f64 / (total_count as f64 + 1.0),
        })
        .collect();

    rows.sort_by(|a, b| b.recent_ratio.total_cmp(&a.recent_ratio));
    rows
}

/// Non-missing ratings of one category.
pub fn category_ratings(records: &[AppRecord], category: &str) -> Vec<f64> {
    records
        .iter()
        .filter(|record| record.category == category)
        .filter_map(|record| record.rating)
        .collect()
}

pub fn all_ratings(records: &[AppRecord]) -> Vec<f64> {
    records.iter().filter_map(|record| record.rating).collect()
}

/// Most frequent category by row count; ties go to the first name in order.
pub fn modal_category(records: &[AppRecord]) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        *counts.entry(record.category.as_str()).or_insert(0) += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for (category, count) in counts {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((category, count));
        }
    }
    best.map(|(category, _)| category.to_string())
}

/// Welch's unequal-variance t-test with a two-sided p-value.
///
/// Precondition: both samples need at least two values. This function does
/// not enforce it; shorter samples produce NaN statistics and callers are
/// expected to skip the comparison instead.
pub fn welch_t_test(a: &[f64], b: &[f64]) -> SignificanceResult {
    let (na, nb) = (a.len() as f64, b.len() as f64);
    let se_a = sample_variance(a) / na;
    let se_b = sample_variance(b) / nb;
    let standard_error = (se_a + se_b).sqrt();

    let t_statistic = (mean(a) - mean(b)) / standard_error;
    let dof = (se_a + se_b).powi(2) / (se_a.powi(2) / (na - 1.0) + se_b.powi(2) / (nb - 1.0));

    // Two zero-spread samples with different means: the degrees of freedom
    // collapse to 0/0 but the separation is total.
    let p_value = if t_statistic.is_infinite() {
        0.0
    } else {
        match StudentsT::new(0.0, 1.0, dof) {
            Ok(dist) if t_statistic.is_finite() => 2.0 * dist.sf(t_statistic.abs()),
            _ => f64::NAN,
        }
    };

    SignificanceResult {
        t_statistic,
        p_value,
        n_a: a.len(),
        n_b: b.len(),
    }
}

/// Compares the non-missing ratings of two categories.
pub fn significance_of_rating_diff(
    records: &[AppRecord],
    category_a: &str,
    category_b: &str,
) -> SignificanceResult {
    welch_t_test(
        &category_ratings(records, category_a),
        &category_ratings(records, category_b),
    )
}
