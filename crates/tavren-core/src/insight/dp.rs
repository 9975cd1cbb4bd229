//! Differential privacy mechanism
//!
//! Adds calibrated Laplace noise to per-category average store visits.
//! Sensitivity assumes bounded contribution: the upper bound is set
//! slightly above the observed per-user maximum.

use std::collections::BTreeMap;

use rand::Rng;
use serde_json::Value;
use tracing::debug;

use crate::errors::{CoreError, CoreResult};

/// Sample from Laplace(0, scale) via inverse CDF
pub fn sample_laplace(scale: f64) -> f64 {
    let u: f64 = rand::thread_rng().gen_range(-0.5..0.5);
    -scale * u.signum() * (1.0 - 2.0 * u.abs()).ln()
}

/// Per-user visit counts grouped by store category
pub fn visit_counts_by_category(records: &[Value]) -> CoreResult<BTreeMap<String, Vec<f64>>> {
    let mut per_user: BTreeMap<(String, String), f64> = BTreeMap::new();

    for record in records {
        let category = record
            .get("store_category")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CoreError::validation("Data must contain a 'store_category' column")
            })?;
        let user = record
            .get("user_id")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::validation("Data must contain a 'user_id' column"))?;

        *per_user
            .entry((category.to_string(), user.to_string()))
            .or_insert(0.0) += 1.0;
    }

    let mut by_category: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for ((category, _user), count) in per_user {
        by_category.entry(category).or_default().push(count);
    }
    Ok(by_category)
}

/// Differentially private per-category averages.
///
/// For each category: clamp per-user counts to [0, 1.1 * max observed],
/// take the mean, add Laplace noise with scale = sensitivity / epsilon
/// where sensitivity = (upper - lower) / n, and clamp the result to be
/// non-negative.
pub fn dp_average_store_visits(
    records: &[Value],
    epsilon: f64,
) -> CoreResult<BTreeMap<String, f64>> {
    debug!(epsilon, "Applying DP to average store visits");

    let by_category = visit_counts_by_category(records)?;
    let mut results = BTreeMap::new();

    for (category, counts) in by_category {
        let max_observed = counts.iter().cloned().fold(f64::MIN, f64::max);
        let lower = 0.0;
        let upper = max_observed * 1.1;
        let sensitivity = (upper - lower) / counts.len() as f64;

        let clamped: Vec<f64> = counts.iter().map(|c| c.clamp(lower, upper)).collect();
        let mean = clamped.iter().sum::<f64>() / clamped.len() as f64;

        let noise = sample_laplace(sensitivity / epsilon);
        results.insert(category, (mean + noise).max(0.0));
    }

    Ok(results)
}

/// Rough error estimate surfaced in result metadata, in percent
pub fn estimated_error_pct(epsilon: f64) -> f64 {
    (1.0 / epsilon * 100.0 * 100.0).round() / 100.0
}
