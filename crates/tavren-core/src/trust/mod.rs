//! Buyer trust scoring and offer filtering
//!
//! Trust starts at 1.0 and decays per decline, weighted by the sensitivity
//! of the decline reason. Declines reference offers whose ids embed the
//! buyer (`buyer-<id>-offer-<n>`); events that do not parse are skipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::entities::consent::ConsentEvent;
use crate::errors::CoreResult;
use crate::store::ConsentEventStore;

/// Penalty for declines in sensitive categories (privacy, trust,
/// complexity). Three such declines move a buyer out of "full" access,
/// five into "restricted".
const SENSITIVE_PENALTY: f64 = 0.15;

/// Penalty for all other decline categories
const DEFAULT_PENALTY: f64 = 0.05;

/// Buyers below half trust are flagged risky
const RISKY_THRESHOLD: f64 = 0.5;

/// Category recorded when a decline gave no reason
pub const REASON_UNSPECIFIED: &str = "unspecified";

/// Trust statistics for one buyer, recomputed on demand
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyerTrustStats {
    pub buyer_id: String,
    pub decline_count: usize,
    pub reasons: BTreeMap<String, usize>,
    pub trust_score: f64,
    pub is_risky: bool,
}

/// Access level a buyer's trust score grants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyerAccessLevel {
    pub access: String,
    pub trust_score: f64,
}

/// An offer with its sensitivity classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub title: String,
    pub description: String,
    pub sensitivity_level: String,
}

/// The static offer catalog served to buyers
pub fn default_offers() -> Vec<Offer> {
    vec![
        Offer {
            title: "Basic Data Share".into(),
            description: "Share anonymous usage stats.".into(),
            sensitivity_level: "low".into(),
        },
        Offer {
            title: "Contact Info Share".into(),
            description: "Share email for newsletters.".into(),
            sensitivity_level: "medium".into(),
        },
        Offer {
            title: "Location Tracking".into(),
            description: "Enable background location for personalized ads.".into(),
            sensitivity_level: "high".into(),
        },
        Offer {
            title: "Purchase History Analysis".into(),
            description: "Allow analysis of your purchase history.".into(),
            sensitivity_level: "medium".into(),
        },
        Offer {
            title: "Public Profile Data".into(),
            description: "Share your public profile information.".into(),
            sensitivity_level: "low".into(),
        },
        Offer {
            title: "Biometric Data Access".into(),
            description: "Allow access to fingerprint/face ID.".into(),
            sensitivity_level: "high".into(),
        },
    ]
}

/// Extract the buyer id from an offer id of the form
/// `buyer-<id>-offer-<n>`
pub fn buyer_id_from_offer(offer_id: &str) -> Option<&str> {
    let rest = offer_id.strip_prefix("buyer-")?;
    let (buyer_id, _) = rest.split_once("-offer-")?;
    if buyer_id.is_empty() {
        None
    } else {
        Some(buyer_id)
    }
}

fn penalty_for(reason_category: &str) -> f64 {
    match reason_category {
        "privacy" | "trust" | "complexity" => SENSITIVE_PENALTY,
        _ => DEFAULT_PENALTY,
    }
}

/// Computes buyer trust tiers from decline history
pub struct TrustService {
    consents: Arc<dyn ConsentEventStore>,
    low_threshold: f64,
    high_threshold: f64,
}

impl TrustService {
    pub fn new(consents: Arc<dyn ConsentEventStore>, low_threshold: f64, high_threshold: f64) -> Self {
        Self {
            consents,
            low_threshold,
            high_threshold,
        }
    }

    /// Trust statistics for every buyer with at least one decline
    pub async fn buyer_trust_stats(&self) -> CoreResult<Vec<BuyerTrustStats>> {
        let declines = self.consents.declined_events().await?;

        let mut per_buyer: BTreeMap<String, Vec<&ConsentEvent>> = BTreeMap::new();
        for event in &declines {
            let Some(offer_id) = event.offer_id.as_deref() else {
                continue;
            };
            let Some(buyer_id) = buyer_id_from_offer(offer_id) else {
                debug!(offer_id, "Skipping decline with unparseable offer id");
                continue;
            };
            per_buyer.entry(buyer_id.to_string()).or_default().push(event);
        }

        let stats = per_buyer
            .into_iter()
            .map(|(buyer_id, events)| Self::stats_for(buyer_id, &events))
            .collect();
        Ok(stats)
    }

    fn stats_for(buyer_id: String, declines: &[&ConsentEvent]) -> BuyerTrustStats {
        let mut reasons: BTreeMap<String, usize> = BTreeMap::new();
        let mut score = 1.0_f64;

        for event in declines {
            let category = event
                .reason_category
                .as_deref()
                .unwrap_or(REASON_UNSPECIFIED);
            *reasons.entry(category.to_string()).or_insert(0) += 1;
            score -= penalty_for(category);
        }
        let trust_score = score.max(0.0);

        BuyerTrustStats {
            buyer_id,
            decline_count: declines.len(),
            reasons,
            trust_score,
            is_risky: trust_score < RISKY_THRESHOLD,
        }
    }

    /// Trust score for one buyer; a buyer with no declines scores 1.0
    pub async fn trust_score(&self, buyer_id: &str) -> CoreResult<f64> {
        let stats = self.buyer_trust_stats().await?;
        Ok(stats
            .into_iter()
            .find(|s| s.buyer_id == buyer_id)
            .map(|s| s.trust_score)
            .unwrap_or(1.0))
    }

    /// Map a trust score to the access level: below the low threshold only
    /// low-sensitivity offers, above the high threshold everything
    pub async fn buyer_access_level(&self, buyer_id: &str) -> CoreResult<BuyerAccessLevel> {
        let trust_score = self.trust_score(buyer_id).await?;
        let access = if trust_score < self.low_threshold {
            "restricted"
        } else if trust_score > self.high_threshold {
            "full"
        } else {
            "limited"
        };

        info!(buyer_id, trust_score, access, "Computed buyer access level");
        Ok(BuyerAccessLevel {
            access: access.to_string(),
            trust_score,
        })
    }

    /// Offers compatible with the buyer's access level
    pub async fn filtered_offers(&self, buyer_id: &str) -> CoreResult<Vec<Offer>> {
        let access = self.buyer_access_level(buyer_id).await?;
        let offers = default_offers()
            .into_iter()
            .filter(|offer| match access.access.as_str() {
                "full" => true,
                "limited" => offer.sensitivity_level != "high",
                _ => offer.sensitivity_level == "low",
            })
            .collect();
        Ok(offers)
    }
}
