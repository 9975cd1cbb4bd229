//! Data Subject Request engine
//!
//! Handles the three DSR operations: export, delete, and restrict. Every
//! operation emits a `dsr_request` audit event to the consent ledger;
//! restriction additionally records the global opt-out sentinel. The DSR
//! engine fails closed: restriction checks that error deny processing.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use crate::consent::export::{ConsentExportService, ExportBundle};
use crate::consent::ledger::ConsentLedgerService;
use crate::consent::restriction::{find_restriction, RestrictionDetails, DSR_TYPE_RESTRICTION};
use crate::entities::consent::{
    ConsentAction, ConsentEventDraft, InitiatedBy, OFFER_DSR_AUDIT, OFFER_SYSTEM_RESTRICTION,
    SCOPE_ALL,
};
use crate::errors::CoreResult;
use crate::store::{PayoutStore, RewardStore, UserStore};

/// DSR action types recorded in audit metadata
pub const DSR_ACTION_EXPORT: &str = "data_export";
pub const DSR_ACTION_DELETE: &str = "data_deletion";
pub const DSR_ACTION_RESTRICT: &str = DSR_TYPE_RESTRICTION;

/// Options for a deletion request
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeleteOptions {
    /// Delete the user profile row
    pub delete_profile: bool,
    /// Delete consent history. Normally left false so the audit trail
    /// survives the account.
    pub delete_consent: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            delete_profile: true,
            delete_consent: false,
        }
    }
}

/// Result of a deletion request: what went away and what was kept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionReport {
    pub user_id: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub deleted_categories: Vec<String>,
    pub preserved_categories: Vec<String>,
}

/// Result of a restriction request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestrictionReport {
    pub user_id: String,
    pub restriction_applied: bool,
    pub restriction_scope: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub consent_event_id: i64,
}

/// Plain (unsigned) user data export for the self-service DSR endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDataExport {
    pub user_id: String,
    pub export_date: chrono::DateTime<Utc>,
    pub data_categories: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_profile: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent_history: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewards_history: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout_history: Option<Vec<Value>>,
}

/// Service handling Data Subject Requests
pub struct DsrService {
    ledger: Arc<ConsentLedgerService>,
    export: Arc<ConsentExportService>,
    users: Arc<dyn UserStore>,
    rewards: Arc<dyn RewardStore>,
    payouts: Arc<dyn PayoutStore>,
}

impl DsrService {
    pub fn new(
        ledger: Arc<ConsentLedgerService>,
        export: Arc<ConsentExportService>,
        users: Arc<dyn UserStore>,
        rewards: Arc<dyn RewardStore>,
        payouts: Arc<dyn PayoutStore>,
    ) -> Self {
        Self {
            ledger,
            export,
            users,
            rewards,
            payouts,
        }
    }

    /// Check if the user has any DSR-related processing restriction.
    /// Errors deny: a failing check restricts.
    pub async fn check_restrictions(&self, user_id: &str) -> (bool, Option<RestrictionDetails>) {
        match self.ledger.user_history(user_id).await {
            Ok(history) => match find_restriction(&history) {
                Some(details) => (true, Some(details)),
                None => (false, None),
            },
            Err(e) => {
                error!(user_id, error = %e, "Restriction check failed; failing closed");
                (
                    true,
                    Some(RestrictionDetails {
                        status: "restricted".to_string(),
                        reason: format!("Restriction check failed: {}", e),
                        restriction_type: "check_error".to_string(),
                        applied_at: Utc::now(),
                        scope: SCOPE_ALL.to_string(),
                        restriction_id: 0,
                    }),
                )
            }
        }
    }

    /// Assemble a plain export of all of the user's data. Missing
    /// categories are skipped rather than failing the export.
    pub async fn export_user_data(&self, user_id: &str) -> CoreResult<UserDataExport> {
        info!(user_id, "Generating DSR data export");

        let mut export = UserDataExport {
            user_id: user_id.to_string(),
            export_date: Utc::now(),
            data_categories: Vec::new(),
            user_profile: None,
            consent_history: None,
            rewards_history: None,
            payout_history: None,
        };

        if let Some(user) = self.users.find_by_username(user_id).await? {
            export.user_profile = Some(user.export_view());
            export.data_categories.push("user_profile".to_string());
        }

        let history = self.ledger.user_history(user_id).await?;
        if !history.is_empty() {
            export.consent_history = Some(
                history
                    .iter()
                    .map(|e| {
                        serde_json::json!({
                            "id": e.id,
                            "action": e.action.as_str(),
                            "timestamp": e.timestamp,
                            "scope": e.scope,
                            "purpose": e.purpose,
                            "verification_hash": e.hash,
                        })
                    })
                    .collect(),
            );
            export.data_categories.push("consent_history".to_string());
        }

        let rewards = self.rewards.history(user_id).await?;
        if !rewards.is_empty() {
            export.rewards_history = Some(
                rewards
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "id": r.id,
                            "offer_id": r.offer_id,
                            "amount": r.amount,
                            "timestamp": r.timestamp,
                        })
                    })
                    .collect(),
            );
            export.data_categories.push("rewards_history".to_string());
        }

        let payouts = self.payouts.history(user_id).await?;
        if !payouts.is_empty() {
            export.payout_history = Some(
                payouts
                    .iter()
                    .map(|p| {
                        serde_json::json!({
                            "id": p.id,
                            "amount": p.amount,
                            "status": p.status.as_str(),
                            "requested_at": p.timestamp,
                            "paid_at": p.paid_at,
                        })
                    })
                    .collect(),
            );
            export.data_categories.push("payout_history".to_string());
        }

        self.log_dsr_action(user_id, DSR_ACTION_EXPORT).await?;
        Ok(export)
    }

    /// Build the signed, verifiable export bundle (admin/audit surface)
    pub async fn generate_signed_export(
        &self,
        user_id: &str,
        include_pet_queries: bool,
        sign: bool,
    ) -> CoreResult<ExportBundle> {
        let bundle = self
            .export
            .generate_export_package(user_id, include_pet_queries, sign)
            .await?;
        self.log_dsr_action(user_id, DSR_ACTION_EXPORT).await?;
        Ok(bundle)
    }

    /// Delete user data. Rewards go unconditionally; the profile goes when
    /// requested; consent history is preserved for audit unless explicitly
    /// requested; payout records are always preserved for financial
    /// compliance.
    pub async fn delete_user_data(
        &self,
        user_id: &str,
        options: DeleteOptions,
    ) -> CoreResult<DeletionReport> {
        info!(user_id, ?options, "Processing DSR deletion request");

        let mut report = DeletionReport {
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
            deleted_categories: Vec::new(),
            preserved_categories: Vec::new(),
        };

        if options.delete_profile {
            if self.users.delete_by_username(user_id).await? {
                report.deleted_categories.push("user_profile".to_string());
            } else {
                report.preserved_categories.push("user_profile".to_string());
            }
        } else {
            report.preserved_categories.push("user_profile".to_string());
        }

        if self.rewards.delete_for_user(user_id).await? > 0 {
            report.deleted_categories.push("rewards_history".to_string());
        }

        if options.delete_consent {
            if self.ledger.delete_user_events(user_id).await? > 0 {
                report.deleted_categories.push("consent_history".to_string());
            }
        } else {
            report
                .preserved_categories
                .push("consent_history".to_string());
        }

        report.preserved_categories.push("payout_history".to_string());

        self.log_dsr_action(user_id, DSR_ACTION_DELETE).await?;
        Ok(report)
    }

    /// Restrict all future data processing for a user.
    ///
    /// Records the global opt-out sentinel and the DSR audit event; either
    /// alone is sufficient for the validator to deny.
    pub async fn restrict_processing(
        &self,
        user_id: &str,
        restriction_scope: Option<&str>,
        restriction_reason: Option<&str>,
    ) -> CoreResult<RestrictionReport> {
        let scope = restriction_scope.unwrap_or(SCOPE_ALL);
        info!(user_id, scope, "Processing DSR restriction request");

        let opt_out = ConsentEventDraft::new(user_id, ConsentAction::OptOut)
            .with_offer_id(OFFER_SYSTEM_RESTRICTION)
            .with_scope(scope)
            .with_purpose(SCOPE_ALL)
            .initiated_by(InitiatedBy::UserDsr)
            .with_metadata(serde_json::json!({
                "dsr_type": DSR_ACTION_RESTRICT,
                "restriction_reason": restriction_reason,
                "restriction_date": Utc::now(),
            }));
        let event = self.ledger.record_event(opt_out).await?;

        self.log_dsr_action(user_id, DSR_ACTION_RESTRICT).await?;

        Ok(RestrictionReport {
            user_id: user_id.to_string(),
            restriction_applied: true,
            restriction_scope: scope.to_string(),
            timestamp: Utc::now(),
            consent_event_id: event.id,
        })
    }

    /// Append the DSR audit-trail event to the consent ledger
    async fn log_dsr_action(&self, user_id: &str, action_type: &str) -> CoreResult<()> {
        let audit = ConsentEventDraft::new(user_id, ConsentAction::DsrRequest)
            .with_offer_id(OFFER_DSR_AUDIT)
            .with_scope("user_data")
            .with_purpose("regulatory_compliance")
            .initiated_by(InitiatedBy::UserDsr)
            .with_metadata(serde_json::json!({
                "dsr_type": action_type,
                "request_timestamp": Utc::now(),
            }));
        self.ledger.record_event(audit).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::ledger::LedgerJournal;
    use crate::consent::validator::ConsentValidator;
    use crate::entities::{PayoutRequest, PayoutStatus, Reward, User};
    use crate::store::memory::{
        MemoryConsentStore, MemoryPayoutStore, MemoryRewardStore, MemoryUserStore,
    };

    struct Fixture {
        ledger: Arc<ConsentLedgerService>,
        dsr: DsrService,
        users: Arc<MemoryUserStore>,
        rewards: Arc<MemoryRewardStore>,
    }

    fn fixture() -> Fixture {
        let path =
            std::env::temp_dir().join(format!("tavren-dsr-{}.jsonl", uuid::Uuid::new_v4()));
        let ledger = Arc::new(ConsentLedgerService::new(
            Arc::new(MemoryConsentStore::new()),
            LedgerJournal::new(path),
        ));
        let users = Arc::new(MemoryUserStore::new());
        let rewards = Arc::new(MemoryRewardStore::new());
        let payouts = Arc::new(MemoryPayoutStore::new());
        let export = Arc::new(ConsentExportService::new(
            ledger.clone(),
            users.clone(),
            b"test-key".to_vec(),
        ));
        let dsr = DsrService::new(
            ledger.clone(),
            export,
            users.clone(),
            rewards.clone(),
            payouts.clone(),
        );

        users.insert(User {
            id: 1,
            username: "u1".into(),
            email: "u1@example.com".into(),
            is_active: true,
        });
        rewards.insert(Reward {
            id: 1,
            user_id: "u1".into(),
            offer_id: "buyer-1-offer-1".into(),
            amount: 2.5,
            timestamp: Utc::now(),
        });
        payouts.insert(PayoutRequest {
            id: 1,
            user_id: "u1".into(),
            amount: 10.0,
            status: PayoutStatus::Pending,
            timestamp: Utc::now(),
            paid_at: None,
        });

        Fixture {
            ledger,
            dsr,
            users,
            rewards,
        }
    }

    #[tokio::test]
    async fn test_restrict_records_both_sentinels() {
        let f = fixture();
        let report = f
            .dsr
            .restrict_processing("u1", None, Some("testing"))
            .await
            .unwrap();
        assert!(report.restriction_applied);
        assert_eq!(report.restriction_scope, "all");

        let history = f.ledger.user_history("u1").await.unwrap();
        assert!(history.iter().any(|e| {
            e.action == ConsentAction::OptOut
                && e.offer_id.as_deref() == Some(OFFER_SYSTEM_RESTRICTION)
        }));
        assert!(history.iter().any(|e| {
            e.action == ConsentAction::DsrRequest && e.dsr_type() == Some(DSR_ACTION_RESTRICT)
        }));
    }

    #[tokio::test]
    async fn test_restrict_overrides_prior_opt_in() {
        let f = fixture();
        f.ledger
            .record_event(
                ConsentEventDraft::new("u2", ConsentAction::OptIn)
                    .with_scope(SCOPE_ALL)
                    .with_purpose(SCOPE_ALL),
            )
            .await
            .unwrap();
        f.dsr
            .restrict_processing("u2", None, Some("testing"))
            .await
            .unwrap();

        let validator = ConsentValidator::new(f.ledger.clone());
        let decision = validator
            .is_processing_allowed("u2", "location", "insight_generation")
            .await;
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("Data Subject Request"));
        let restriction_type = decision.dsr_details.unwrap().restriction_type;
        assert!(matches!(
            restriction_type.as_str(),
            "dsr_request" | "system_restriction"
        ));
    }

    #[tokio::test]
    async fn test_check_restrictions_after_restrict() {
        let f = fixture();
        let (restricted, _) = f.dsr.check_restrictions("u1").await;
        assert!(!restricted);

        f.dsr.restrict_processing("u1", None, None).await.unwrap();
        let (restricted, details) = f.dsr.check_restrictions("u1").await;
        assert!(restricted);
        assert!(details.is_some());
    }

    #[tokio::test]
    async fn test_delete_preserves_consent_and_payouts_by_default() {
        let f = fixture();
        let report = f
            .dsr
            .delete_user_data("u1", DeleteOptions::default())
            .await
            .unwrap();

        assert!(report
            .deleted_categories
            .contains(&"user_profile".to_string()));
        assert!(report
            .deleted_categories
            .contains(&"rewards_history".to_string()));
        assert!(report
            .preserved_categories
            .contains(&"consent_history".to_string()));
        assert!(report
            .preserved_categories
            .contains(&"payout_history".to_string()));

        assert!(f.users.find_by_username("u1").await.unwrap().is_none());
        assert!(f.rewards.history("u1").await.unwrap().is_empty());
        // The deletion itself leaves an audit event behind
        assert!(!f.ledger.user_history("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_consent_when_requested() {
        let f = fixture();
        f.ledger
            .record_event(ConsentEventDraft::new("u1", ConsentAction::OptIn))
            .await
            .unwrap();

        let report = f
            .dsr
            .delete_user_data(
                "u1",
                DeleteOptions {
                    delete_profile: true,
                    delete_consent: true,
                },
            )
            .await
            .unwrap();
        assert!(report
            .deleted_categories
            .contains(&"consent_history".to_string()));
    }

    #[tokio::test]
    async fn test_export_collects_categories_and_logs_audit() {
        let f = fixture();
        f.ledger
            .record_event(ConsentEventDraft::new("u1", ConsentAction::OptIn))
            .await
            .unwrap();

        let export = f.dsr.export_user_data("u1").await.unwrap();
        assert!(export.data_categories.contains(&"user_profile".to_string()));
        assert!(export
            .data_categories
            .contains(&"consent_history".to_string()));
        assert!(export
            .data_categories
            .contains(&"rewards_history".to_string()));
        assert!(export
            .data_categories
            .contains(&"payout_history".to_string()));

        let history = f.ledger.user_history("u1").await.unwrap();
        assert!(history.iter().any(|e| {
            e.action == ConsentAction::DsrRequest && e.dsr_type() == Some(DSR_ACTION_EXPORT)
        }));
    }
}
