//! Real-time consent validation
//!
//! Decides whether a (user, scope, purpose) processing operation is
//! permitted. DSR restrictions strictly override any opt-in. The validator
//! fails closed: on any internal error the decision is "not allowed" with
//! an explanation.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::consent::ledger::ConsentLedgerService;
use crate::consent::restriction::{find_restriction, RestrictionDetails};
use crate::entities::consent::{ConsentAction, ConsentEvent, SCOPE_ALL};
use crate::errors::CoreResult;

/// Outcome of a consent check, with the context callers surface to users
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentDecision {
    pub allowed: bool,
    pub user_id: String,
    pub scope: String,
    pub purpose: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dsr_details: Option<RestrictionDetails>,
}

impl ConsentDecision {
    fn denied(user_id: &str, scope: &str, purpose: &str, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            user_id: user_id.to_string(),
            scope: scope.to_string(),
            purpose: purpose.to_string(),
            reason: Some(reason.into()),
            consent_id: None,
            granted_at: None,
            revoked_at: None,
            required_action: None,
            dsr_details: None,
        }
    }
}

/// Validates processing requests against the consent ledger
pub struct ConsentValidator {
    ledger: Arc<ConsentLedgerService>,
}

impl ConsentValidator {
    pub fn new(ledger: Arc<ConsentLedgerService>) -> Self {
        Self { ledger }
    }

    /// Check whether the user has an active DSR processing restriction
    pub async fn check_dsr_restrictions(
        &self,
        user_id: &str,
    ) -> CoreResult<Option<RestrictionDetails>> {
        let history = self.ledger.user_history(user_id).await?;
        Ok(find_restriction(&history))
    }

    /// Decide whether processing is allowed for (user, scope, purpose).
    ///
    /// Fails closed: internal errors produce a denied decision rather than
    /// an error.
    pub async fn is_processing_allowed(
        &self,
        user_id: &str,
        data_scope: &str,
        purpose: &str,
    ) -> ConsentDecision {
        match self.evaluate(user_id, data_scope, purpose).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(
                    user_id,
                    error = %e,
                    "Consent validation failed internally; denying"
                );
                ConsentDecision::denied(
                    user_id,
                    data_scope,
                    purpose,
                    format!("Consent validation error: {}", e),
                )
            }
        }
    }

    async fn evaluate(
        &self,
        user_id: &str,
        data_scope: &str,
        purpose: &str,
    ) -> CoreResult<ConsentDecision> {
        let history = self.ledger.user_history(user_id).await?;

        // DSR restrictions override regular consent unconditionally
        if let Some(restriction) = find_restriction(&history) {
            warn!(user_id, "Processing disallowed due to DSR restriction");
            let mut decision = ConsentDecision::denied(
                user_id,
                data_scope,
                purpose,
                "Processing restricted due to Data Subject Request",
            );
            decision.dsr_details = Some(restriction);
            return Ok(decision);
        }

        if history.is_empty() {
            warn!(user_id, "No consent records found");
            let mut decision =
                ConsentDecision::denied(user_id, data_scope, purpose, "No consent history found for user");
            decision.required_action = Some("opt_in".to_string());
            return Ok(decision);
        }

        // Prefer exact/wildcard scope matches; fall back to events with no
        // scope at all, which act as global consent settings
        let mut relevant: Vec<&ConsentEvent> = history
            .iter()
            .filter(|e| e.matches_scope(data_scope) && e.matches_purpose(purpose))
            .collect();
        if relevant.is_empty() {
            relevant = history
                .iter()
                .filter(|e| e.scope.is_none() && e.matches_purpose(purpose))
                .collect();
        }

        relevant.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));

        let latest = match relevant.first() {
            Some(latest) => *latest,
            None => {
                warn!(user_id, data_scope, purpose, "No relevant consent found");
                let mut decision = ConsentDecision::denied(
                    user_id,
                    data_scope,
                    purpose,
                    format!("No consent found for {} with purpose {}", data_scope, purpose),
                );
                decision.required_action = Some("opt_in".to_string());
                return Ok(decision);
            }
        };

        if latest.action.revokes_consent() {
            info!(
                user_id,
                data_scope,
                action = latest.action.as_str(),
                "Consent revoked"
            );
            let mut decision = ConsentDecision::denied(
                user_id,
                data_scope,
                purpose,
                format!("Consent revoked for {}", data_scope),
            );
            decision.consent_id = Some(latest.id);
            decision.revoked_at = Some(latest.timestamp);
            decision.required_action = Some("opt_in".to_string());
            return Ok(decision);
        }

        info!(user_id, data_scope, purpose, "Consent valid");
        Ok(ConsentDecision {
            allowed: true,
            user_id: user_id.to_string(),
            scope: data_scope.to_string(),
            purpose: purpose.to_string(),
            reason: None,
            consent_id: Some(latest.id),
            granted_at: Some(latest.timestamp),
            revoked_at: None,
            required_action: None,
            dsr_details: None,
        })
    }

    /// Freshness re-check before an irreversible dependent effect (token
    /// issuance, data delivery): confirms no revocation or DSR event landed
    /// at or after the authorization snapshot.
    pub async fn no_revocation_since(
        &self,
        user_id: &str,
        snapshot: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let history = self.ledger.user_history(user_id).await?;
        Ok(!history.iter().any(|e| {
            e.timestamp >= snapshot
                && (e.action.revokes_consent() || e.action == ConsentAction::DsrRequest)
        }))
    }

    /// All currently active (scope -> purposes) pairs, from a chronological
    /// fold of the history
    pub async fn active_scopes(
        &self,
        user_id: &str,
    ) -> CoreResult<BTreeMap<String, Vec<String>>> {
        let history = self.ledger.user_history(user_id).await?;

        let mut active: BTreeMap<String, BTreeMap<String, DateTime<Utc>>> = BTreeMap::new();

        for event in &history {
            let scope = event.scope_or_all().to_string();
            let purpose = event.purpose_or_all().to_string();

            if event.action.grants_consent() {
                active.entry(scope).or_default().insert(purpose, event.timestamp);
            } else if event.action.revokes_consent() {
                if let Some(purposes) = active.get_mut(&scope) {
                    if purpose == SCOPE_ALL {
                        purposes.clear();
                    } else {
                        purposes.remove(&purpose);
                    }
                    if purposes.is_empty() {
                        active.remove(&scope);
                    }
                }
            }
        }

        Ok(active
            .into_iter()
            .map(|(scope, purposes)| (scope, purposes.into_keys().collect()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::ledger::LedgerJournal;
    use crate::entities::consent::{ConsentEventDraft, InitiatedBy, OFFER_SYSTEM_RESTRICTION};
    use crate::store::memory::MemoryConsentStore;

    fn fixture() -> (Arc<ConsentLedgerService>, ConsentValidator) {
        let path = std::env::temp_dir().join(format!(
            "tavren-validator-{}.jsonl",
            uuid::Uuid::new_v4()
        ));
        let ledger = Arc::new(ConsentLedgerService::new(
            Arc::new(MemoryConsentStore::new()),
            LedgerJournal::new(path),
        ));
        let validator = ConsentValidator::new(ledger.clone());
        (ledger, validator)
    }

    #[tokio::test]
    async fn test_no_history_denies() {
        let (_, validator) = fixture();
        let decision = validator
            .is_processing_allowed("ghost", "location", "insight_generation")
            .await;
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("No consent history"));
        assert_eq!(decision.required_action.as_deref(), Some("opt_in"));
    }

    #[tokio::test]
    async fn test_opt_in_allows() {
        let (ledger, validator) = fixture();
        let event = ledger
            .record_event(
                ConsentEventDraft::new("u1", ConsentAction::OptIn)
                    .with_scope("location")
                    .with_purpose("insight_generation"),
            )
            .await
            .unwrap();

        let decision = validator
            .is_processing_allowed("u1", "location", "insight_generation")
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.consent_id, Some(event.id));
        assert!(decision.granted_at.is_some());
    }

    #[tokio::test]
    async fn test_later_opt_out_denies() {
        let (ledger, validator) = fixture();
        ledger
            .record_event(
                ConsentEventDraft::new("u1", ConsentAction::OptIn)
                    .with_scope("location")
                    .with_purpose("insight_generation"),
            )
            .await
            .unwrap();
        ledger
            .record_event(
                ConsentEventDraft::new("u1", ConsentAction::OptOut)
                    .with_scope("location")
                    .with_purpose("insight_generation"),
            )
            .await
            .unwrap();

        let decision = validator
            .is_processing_allowed("u1", "location", "insight_generation")
            .await;
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("Consent revoked"));
        assert!(decision.consent_id.is_some());
    }

    #[tokio::test]
    async fn test_wildcard_scope_covers_specific_request() {
        let (ledger, validator) = fixture();
        ledger
            .record_event(
                ConsentEventDraft::new("u1", ConsentAction::OptIn)
                    .with_scope("all")
                    .with_purpose("all"),
            )
            .await
            .unwrap();

        let decision = validator
            .is_processing_allowed("u1", "location", "insight_generation")
            .await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_dsr_restriction_overrides_opt_in() {
        let (ledger, validator) = fixture();
        ledger
            .record_event(
                ConsentEventDraft::new("u2", ConsentAction::OptIn)
                    .with_scope("all")
                    .with_purpose("all"),
            )
            .await
            .unwrap();
        ledger
            .record_event(
                ConsentEventDraft::new("u2", ConsentAction::OptOut)
                    .with_scope("all")
                    .with_purpose("all")
                    .with_offer_id(OFFER_SYSTEM_RESTRICTION)
                    .initiated_by(InitiatedBy::UserDsr),
            )
            .await
            .unwrap();

        let decision = validator
            .is_processing_allowed("u2", "location", "insight_generation")
            .await;
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("Data Subject Request"));
        let details = decision.dsr_details.unwrap();
        assert_eq!(details.restriction_type, "system_restriction");
    }

    #[tokio::test]
    async fn test_no_matching_scope_denies() {
        let (ledger, validator) = fixture();
        ledger
            .record_event(
                ConsentEventDraft::new("u1", ConsentAction::OptIn)
                    .with_scope("health")
                    .with_purpose("research"),
            )
            .await
            .unwrap();

        let decision = validator
            .is_processing_allowed("u1", "location", "insight_generation")
            .await;
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("No consent found"));
    }

    #[tokio::test]
    async fn test_active_scopes_fold() {
        let (ledger, validator) = fixture();
        ledger
            .record_event(
                ConsentEventDraft::new("u1", ConsentAction::OptIn)
                    .with_scope("location")
                    .with_purpose("insight_generation"),
            )
            .await
            .unwrap();
        ledger
            .record_event(
                ConsentEventDraft::new("u1", ConsentAction::OptIn)
                    .with_scope("location")
                    .with_purpose("research"),
            )
            .await
            .unwrap();
        ledger
            .record_event(
                ConsentEventDraft::new("u1", ConsentAction::Withdraw)
                    .with_scope("location")
                    .with_purpose("research"),
            )
            .await
            .unwrap();

        let scopes = validator.active_scopes("u1").await.unwrap();
        assert_eq!(
            scopes.get("location"),
            Some(&vec!["insight_generation".to_string()])
        );
    }

    #[tokio::test]
    async fn test_withdraw_all_clears_scope() {
        let (ledger, validator) = fixture();
        ledger
            .record_event(
                ConsentEventDraft::new("u1", ConsentAction::OptIn)
                    .with_scope("location")
                    .with_purpose("insight_generation"),
            )
            .await
            .unwrap();
        ledger
            .record_event(
                ConsentEventDraft::new("u1", ConsentAction::Withdraw)
                    .with_scope("location")
                    .with_purpose("all"),
            )
            .await
            .unwrap();

        let scopes = validator.active_scopes("u1").await.unwrap();
        assert!(scopes.is_empty());
    }

    #[tokio::test]
    async fn test_no_revocation_since() {
        let (ledger, validator) = fixture();
        let snapshot = Utc::now();
        assert!(validator.no_revocation_since("u1", snapshot).await.unwrap());

        ledger
            .record_event(
                ConsentEventDraft::new("u1", ConsentAction::OptOut).with_scope("location"),
            )
            .await
            .unwrap();
        assert!(!validator.no_revocation_since("u1", snapshot).await.unwrap());
    }
}
