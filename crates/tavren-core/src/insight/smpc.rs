//! Secure multi-party computation simulation
//!
//! Additive secret sharing over per-category visit totals: the input is
//! partitioned into N parties, each party splits its per-category total
//! into N shares that sum to the true value, shares are exchanged, and
//! every party sums what it received. The agreed aggregate equals the
//! centralized total without any party revealing its own. Honest-but-
//! curious parties only; shares are drawn from a wide integer range.

use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use serde_json::Value;
use tracing::debug;

use crate::errors::{CoreError, CoreResult};

/// Range shares are drawn from. Wide enough to mask any realistic total.
const SHARE_RANGE: i64 = 1 << 40;

/// One simulated data holder
struct Party {
    /// Per-category visit totals over this party's users
    totals: BTreeMap<String, i64>,
    /// Shares received from every party (including its own retained share)
    received: Vec<BTreeMap<String, i64>>,
}

impl Party {
    fn new(totals: BTreeMap<String, i64>) -> Self {
        Self {
            totals,
            received: Vec::new(),
        }
    }

    /// Split each category total into `n` shares summing to the total
    fn compute_shares(&self, categories: &[String], n: usize) -> Vec<BTreeMap<String, i64>> {
        let mut rng = rand::thread_rng();
        let mut shares: Vec<BTreeMap<String, i64>> = vec![BTreeMap::new(); n];

        for category in categories {
            let total = self.totals.get(category).copied().unwrap_or(0);
            let mut sum = 0i64;
            for share in shares.iter_mut().take(n - 1) {
                let value = rng.gen_range(-SHARE_RANGE..SHARE_RANGE);
                share.insert(category.clone(), value);
                sum += value;
            }
            shares[n - 1].insert(category.clone(), total - sum);
        }
        shares
    }

    fn receive(&mut self, share: BTreeMap<String, i64>) {
        self.received.push(share);
    }

    /// Sum of all received shares per category
    fn local_sum(&self, categories: &[String]) -> BTreeMap<String, i64> {
        let mut sums = BTreeMap::new();
        for category in categories {
            let total: i64 = self
                .received
                .iter()
                .map(|share| share.get(category).copied().unwrap_or(0))
                .sum();
            sums.insert(category.clone(), total);
        }
        sums
    }
}

/// Partition records by user across `num_parties` parties and run the
/// share-exchange protocol. Returns per-category average visits:
/// aggregate / (total_users * periods).
pub fn smpc_average_store_visits(
    records: &[Value],
    num_parties: usize,
    periods: u32,
) -> CoreResult<BTreeMap<String, f64>> {
    if num_parties < 2 {
        return Err(CoreError::validation(
            "SMPC requires at least 2 parties",
        ));
    }

    let mut users = BTreeSet::new();
    for record in records {
        let user = record
            .get("user_id")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::validation("Data must contain a 'user_id' column"))?;
        record
            .get("store_category")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CoreError::validation("Data must contain a 'store_category' column")
            })?;
        users.insert(user.to_string());
    }
    if users.is_empty() {
        return Err(CoreError::validation("Input data is empty"));
    }

    debug!(
        num_parties,
        users = users.len(),
        "Running SMPC share exchange"
    );

    // Assign users round-robin to parties, then compute each party's
    // per-category totals
    let user_party: BTreeMap<&str, usize> = users
        .iter()
        .enumerate()
        .map(|(i, user)| (user.as_str(), i % num_parties))
        .collect();

    let mut totals: Vec<BTreeMap<String, i64>> = vec![BTreeMap::new(); num_parties];
    let mut categories = BTreeSet::new();
    for record in records {
        let user = record["user_id"].as_str().expect("validated above");
        let category = record["store_category"].as_str().expect("validated above");
        categories.insert(category.to_string());
        let party = user_party[user];
        *totals[party].entry(category.to_string()).or_insert(0) += 1;
    }
    let categories: Vec<String> = categories.into_iter().collect();

    let mut parties: Vec<Party> = totals.into_iter().map(Party::new).collect();

    // Share exchange: party i sends share j to party j and keeps its own
    for i in 0..num_parties {
        let shares = parties[i].compute_shares(&categories, num_parties);
        for (j, share) in shares.into_iter().enumerate() {
            parties[j].receive(share);
        }
    }

    // Every party's local sum reconstructs the same aggregate
    let aggregate = parties[0].local_sum(&categories);

    let divisor = users.len() as f64 * periods.max(1) as f64;
    Ok(aggregate
        .into_iter()
        .map(|(category, total)| (category, total as f64 / divisor))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn visits(user: &str, category: &str, n: usize) -> Vec<Value> {
        (0..n)
            .map(|_| json!({"user_id": user, "store_category": category}))
            .collect()
    }

    #[test]
    fn test_reconstruction_matches_centralized_aggregate() {
        let mut records = visits("u1", "grocery", 4);
        records.extend(visits("u2", "grocery", 6));
        records.extend(visits("u3", "grocery", 2));
        records.extend(visits("u1", "electronics", 3));

        let result = smpc_average_store_visits(&records, 3, 1).unwrap();
        // 12 grocery visits over 3 users
        assert!((result["grocery"] - 4.0).abs() < 1e-9);
        // 3 electronics visits over 3 users
        assert!((result["electronics"] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_parties_agree() {
        // Shares sum to the true total regardless of partitioning; run the
        // protocol repeatedly to shake out share-generation errors
        let mut records = visits("u1", "grocery", 7);
        records.extend(visits("u2", "grocery", 5));

        for _ in 0..20 {
            let result = smpc_average_store_visits(&records, 2, 1).unwrap();
            assert!((result["grocery"] - 6.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_periods_divide_average() {
        let records = visits("u1", "grocery", 8);
        let result = smpc_average_store_visits(&records, 2, 4).unwrap();
        assert!((result["grocery"] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_requires_two_parties() {
        let records = visits("u1", "grocery", 1);
        assert!(smpc_average_store_visits(&records, 1, 1).is_err());
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(smpc_average_store_visits(&[], 2, 1).is_err());
    }

    #[test]
    fn test_more_parties_than_users_is_fine() {
        let records = visits("u1", "grocery", 3);
        let result = smpc_average_store_visits(&records, 5, 1).unwrap();
        assert!((result["grocery"] - 3.0).abs() < 1e-9);
    }
}
