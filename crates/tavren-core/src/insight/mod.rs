//! Privacy-enhancing insight processor
//!
//! Centralized entry point for aggregate queries over user data. Applies a
//! pluggable privacy mechanism (differential privacy or simulated SMPC),
//! and gates every run on consent and DSR restrictions: a denied consent
//! check rejects the request, and a single restricted user anywhere in the
//! dataset forbids it. Raw values never appear in metadata or logs.

pub mod dp;
pub mod smpc;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::consent::ledger::ConsentLedgerService;
use crate::consent::restriction::find_restriction;
use crate::consent::validator::ConsentValidator;
use crate::errors::{CoreError, CoreResult};

/// Supported aggregate queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    AverageStoreVisits,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::AverageStoreVisits => "average_store_visits",
        }
    }
}

/// Privacy-enhancing technologies the processor can apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivacyMethod {
    Dp,
    Smpc,
}

impl PrivacyMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivacyMethod::Dp => "dp",
            PrivacyMethod::Smpc => "smpc",
        }
    }
}

/// Parameters for the selected privacy method
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrivacyParams {
    pub epsilon: Option<f64>,
    pub delta: Option<f64>,
    pub min_parties: Option<usize>,
    pub periods: Option<u32>,
}

/// A privacy mechanism: parameter validation plus the aggregate transform.
/// Adding a strategy means implementing this trait and registering it in
/// the processor's dispatch.
pub trait PrivacyMechanism: Send + Sync {
    fn validate_params(&self, params: &PrivacyParams) -> CoreResult<()>;
    fn apply(
        &self,
        data: &[Value],
        query_type: QueryType,
        params: &PrivacyParams,
    ) -> CoreResult<BTreeMap<String, f64>>;
}

/// Differential privacy strategy
pub struct DpMechanism;

impl PrivacyMechanism for DpMechanism {
    fn validate_params(&self, params: &PrivacyParams) -> CoreResult<()> {
        let epsilon = params.epsilon.ok_or_else(|| {
            CoreError::validation("Epsilon parameter is required for differential privacy")
        })?;
        if !(epsilon > 0.0) {
            return Err(CoreError::validation("Epsilon must be a positive number"));
        }
        if let Some(delta) = params.delta {
            if !(0.0..1.0).contains(&delta) {
                return Err(CoreError::validation("Delta must be between 0 and 1"));
            }
        }
        Ok(())
    }

    fn apply(
        &self,
        data: &[Value],
        query_type: QueryType,
        params: &PrivacyParams,
    ) -> CoreResult<BTreeMap<String, f64>> {
        match query_type {
            QueryType::AverageStoreVisits => {
                dp::dp_average_store_visits(data, params.epsilon.expect("validated"))
            }
        }
    }
}

/// Simulated SMPC strategy
pub struct SmpcMechanism;

impl PrivacyMechanism for SmpcMechanism {
    fn validate_params(&self, params: &PrivacyParams) -> CoreResult<()> {
        let min_parties = params
            .min_parties
            .ok_or_else(|| CoreError::validation("min_parties parameter is required for SMPC"))?;
        if min_parties < 2 {
            return Err(CoreError::validation(
                "min_parties must be an integer greater than 1",
            ));
        }
        Ok(())
    }

    fn apply(
        &self,
        data: &[Value],
        query_type: QueryType,
        params: &PrivacyParams,
    ) -> CoreResult<BTreeMap<String, f64>> {
        match query_type {
            QueryType::AverageStoreVisits => smpc::smpc_average_store_visits(
                data,
                params.min_parties.expect("validated"),
                params.periods.unwrap_or(1),
            ),
        }
    }
}

/// An insight computation request
#[derive(Debug, Clone)]
pub struct InsightRequest {
    pub data: Vec<Value>,
    pub query_type: QueryType,
    pub privacy_method: PrivacyMethod,
    pub privacy_params: PrivacyParams,
    pub user_id: Option<String>,
    pub data_scope: Option<String>,
    pub purpose: Option<String>,
    pub validate_consent: bool,
}

/// Terminal status of an insight run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightStatus {
    Success,
    Rejected,
    Forbidden,
    Error,
}

/// Metadata attached to every insight outcome. Never contains raw input
/// values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightMetadata {
    pub processing_time_ms: f64,
    pub process_id: String,
    pub query_type: QueryType,
    pub privacy_method: PrivacyMethod,
    pub status: InsightStatus,
    pub timestamp: chrono::DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent_validated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epsilon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_parties: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_error_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restricted_user_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Value>,
}

/// The processed result, or the reason there is none
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightOutcome {
    pub result: Option<BTreeMap<String, f64>>,
    pub metadata: InsightMetadata,
}

/// Orchestrates consent gating, input validation, and mechanism dispatch
pub struct InsightProcessor {
    validator: Option<Arc<ConsentValidator>>,
    ledger: Option<Arc<ConsentLedgerService>>,
}

impl InsightProcessor {
    pub fn new(
        validator: Option<Arc<ConsentValidator>>,
        ledger: Option<Arc<ConsentLedgerService>>,
    ) -> Self {
        Self { validator, ledger }
    }

    /// Run an insight request end to end
    pub async fn process(&self, request: InsightRequest) -> InsightOutcome {
        let started = Instant::now();
        let process_id = Uuid::new_v4().to_string();
        info!(
            process_id = %process_id,
            query_type = request.query_type.as_str(),
            privacy_method = request.privacy_method.as_str(),
            records = request.data.len(),
            "Processing insight request"
        );

        let mut metadata = InsightMetadata {
            processing_time_ms: 0.0,
            process_id,
            query_type: request.query_type,
            privacy_method: request.privacy_method,
            status: InsightStatus::Error,
            timestamp: Utc::now(),
            consent_validated: None,
            epsilon: None,
            min_parties: None,
            estimated_error_pct: None,
            restricted_user_count: None,
            error: None,
            error_details: None,
        };

        let finish = |mut metadata: InsightMetadata,
                      result: Option<BTreeMap<String, f64>>,
                      started: Instant| {
            metadata.processing_time_ms =
                (started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0;
            InsightOutcome { result, metadata }
        };

        // Requester-level consent gate
        if let (Some(validator), Some(user_id), Some(scope)) = (
            self.validator.as_ref(),
            request.user_id.as_deref(),
            request.data_scope.as_deref(),
        ) {
            let purpose = request.purpose.as_deref().unwrap_or("insight_generation");
            let decision = validator.is_processing_allowed(user_id, scope, purpose).await;
            if !decision.allowed {
                warn!(user_id, "Insight request rejected by consent validator");
                metadata.status = InsightStatus::Rejected;
                metadata.error = Some("Consent validation failed".to_string());
                metadata.error_details = serde_json::to_value(&decision).ok();
                return finish(metadata, None, started);
            }
            metadata.consent_validated = Some(true);
        } else if request.user_id.is_some() && request.data_scope.is_some() {
            warn!("User data processed without a consent validator attached");
        }

        // Dataset-level DSR gate: any restricted user forbids processing
        if request.validate_consent {
            if let Some(ledger) = self.ledger.as_ref() {
                match self.count_restricted_users(ledger, &request.data).await {
                    Ok(0) => {}
                    Ok(restricted) => {
                        warn!(restricted, "Insight dataset contains restricted users");
                        metadata.status = InsightStatus::Forbidden;
                        metadata.restricted_user_count = Some(restricted);
                        metadata.error =
                            Some("Some users have requested processing restrictions".to_string());
                        return finish(metadata, None, started);
                    }
                    Err(e) => {
                        // Fail closed on restriction-check errors
                        warn!(error = %e, "DSR restriction check failed; forbidding");
                        metadata.status = InsightStatus::Forbidden;
                        metadata.error = Some(format!("Restriction check failed: {}", e));
                        return finish(metadata, None, started);
                    }
                }
            }
        }

        // Input and parameter validation
        if request.data.is_empty() {
            metadata.error = Some("Input data is empty".to_string());
            return finish(metadata, None, started);
        }
        if !request.data.iter().all(Value::is_object) {
            metadata.error = Some("Input data must be tabular".to_string());
            return finish(metadata, None, started);
        }

        let mechanism: Box<dyn PrivacyMechanism> = match request.privacy_method {
            PrivacyMethod::Dp => Box::new(DpMechanism),
            PrivacyMethod::Smpc => Box::new(SmpcMechanism),
        };

        if let Err(e) = mechanism.validate_params(&request.privacy_params) {
            metadata.error = Some(e.to_string());
            return finish(metadata, None, started);
        }

        match mechanism.apply(&request.data, request.query_type, &request.privacy_params) {
            Ok(result) => {
                metadata.status = InsightStatus::Success;
                match request.privacy_method {
                    PrivacyMethod::Dp => {
                        metadata.epsilon = request.privacy_params.epsilon;
                        metadata.estimated_error_pct = request
                            .privacy_params
                            .epsilon
                            .map(dp::estimated_error_pct);
                    }
                    PrivacyMethod::Smpc => {
                        metadata.min_parties = request.privacy_params.min_parties;
                    }
                }
                finish(metadata, Some(result), started)
            }
            Err(e) => {
                warn!(error = %e, "Insight computation failed");
                metadata.error = Some(format!("Processing error: {}", e));
                finish(metadata, None, started)
            }
        }
    }

    /// Distinct users referenced by the dataset that carry an active DSR
    /// restriction
    async fn count_restricted_users(
        &self,
        ledger: &ConsentLedgerService,
        data: &[Value],
    ) -> CoreResult<usize> {
        let mut users = std::collections::BTreeSet::new();
        for record in data {
            if let Some(user) = record.get("user_id").and_then(Value::as_str) {
                users.insert(user.to_string());
            }
        }

        let mut restricted = 0;
        for user in users {
            let history = ledger.user_history(&user).await?;
            if find_restriction(&history).is_some() {
                restricted += 1;
            }
        }
        Ok(restricted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::ledger::LedgerJournal;
    use crate::entities::consent::{ConsentAction, ConsentEventDraft, InitiatedBy, OFFER_SYSTEM_RESTRICTION};
    use crate::store::memory::MemoryConsentStore;
    use serde_json::json;

    fn fixture() -> (Arc<ConsentLedgerService>, InsightProcessor) {
        let path =
            std::env::temp_dir().join(format!("tavren-insight-{}.jsonl", Uuid::new_v4()));
        let ledger = Arc::new(ConsentLedgerService::new(
            Arc::new(MemoryConsentStore::new()),
            LedgerJournal::new(path),
        ));
        let validator = Arc::new(ConsentValidator::new(ledger.clone()));
        let processor = InsightProcessor::new(Some(validator), Some(ledger.clone()));
        (ledger, processor)
    }

    fn store_visits(users: &[&str]) -> Vec<Value> {
        users
            .iter()
            .flat_map(|user| {
                (0..4).map(move |_| json!({"user_id": user, "store_category": "grocery"}))
            })
            .collect()
    }

    fn dp_request(data: Vec<Value>) -> InsightRequest {
        InsightRequest {
            data,
            query_type: QueryType::AverageStoreVisits,
            privacy_method: PrivacyMethod::Dp,
            privacy_params: PrivacyParams {
                epsilon: Some(10.0),
                ..Default::default()
            },
            user_id: None,
            data_scope: None,
            purpose: None,
            validate_consent: true,
        }
    }

    #[tokio::test]
    async fn test_dp_success_path() {
        let (_, processor) = fixture();
        let outcome = processor.process(dp_request(store_visits(&["u1", "u2"]))).await;

        assert_eq!(outcome.metadata.status, InsightStatus::Success);
        assert!(outcome.result.unwrap().contains_key("grocery"));
        assert_eq!(outcome.metadata.epsilon, Some(10.0));
        assert!(outcome.metadata.estimated_error_pct.is_some());
    }

    #[tokio::test]
    async fn test_smpc_success_path() {
        let (_, processor) = fixture();
        let mut request = dp_request(store_visits(&["u1", "u2", "u3"]));
        request.privacy_method = PrivacyMethod::Smpc;
        request.privacy_params = PrivacyParams {
            min_parties: Some(3),
            ..Default::default()
        };

        let outcome = processor.process(request).await;
        assert_eq!(outcome.metadata.status, InsightStatus::Success);
        let result = outcome.result.unwrap();
        assert!((result["grocery"] - 4.0).abs() < 1e-9);
        assert_eq!(outcome.metadata.min_parties, Some(3));
    }

    #[tokio::test]
    async fn test_restricted_user_forbids_dataset() {
        let (ledger, processor) = fixture();
        // u6 is restricted; u7 is not
        ledger
            .record_event(
                ConsentEventDraft::new("u6", ConsentAction::OptOut)
                    .with_scope("all")
                    .with_purpose("all")
                    .with_offer_id(OFFER_SYSTEM_RESTRICTION)
                    .initiated_by(InitiatedBy::UserDsr),
            )
            .await
            .unwrap();

        let outcome = processor.process(dp_request(store_visits(&["u6", "u7"]))).await;
        assert_eq!(outcome.metadata.status, InsightStatus::Forbidden);
        assert!(outcome.result.is_none());
        assert!(outcome.metadata.restricted_user_count.unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_requester_consent_rejection() {
        let (_, processor) = fixture();
        let mut request = dp_request(store_visits(&["u1"]));
        request.user_id = Some("requester".to_string());
        request.data_scope = Some("location".to_string());

        let outcome = processor.process(request).await;
        assert_eq!(outcome.metadata.status, InsightStatus::Rejected);
        assert!(outcome.result.is_none());
        assert!(outcome.metadata.error_details.is_some());
    }

    #[tokio::test]
    async fn test_requester_with_consent_is_validated() {
        let (ledger, processor) = fixture();
        ledger
            .record_event(
                ConsentEventDraft::new("requester", ConsentAction::OptIn)
                    .with_scope("location")
                    .with_purpose("insight_generation"),
            )
            .await
            .unwrap();

        let mut request = dp_request(store_visits(&["u1"]));
        request.user_id = Some("requester".to_string());
        request.data_scope = Some("location".to_string());

        let outcome = processor.process(request).await;
        assert_eq!(outcome.metadata.status, InsightStatus::Success);
        assert_eq!(outcome.metadata.consent_validated, Some(true));
    }

    #[tokio::test]
    async fn test_invalid_epsilon_is_an_error() {
        let (_, processor) = fixture();
        let mut request = dp_request(store_visits(&["u1"]));
        request.privacy_params.epsilon = Some(0.0);

        let outcome = processor.process(request).await;
        assert_eq!(outcome.metadata.status, InsightStatus::Error);
        assert!(outcome.metadata.error.unwrap().contains("Epsilon"));
    }

    #[tokio::test]
    async fn test_min_parties_validation() {
        let (_, processor) = fixture();
        let mut request = dp_request(store_visits(&["u1"]));
        request.privacy_method = PrivacyMethod::Smpc;
        request.privacy_params = PrivacyParams {
            min_parties: Some(1),
            ..Default::default()
        };

        let outcome = processor.process(request).await;
        assert_eq!(outcome.metadata.status, InsightStatus::Error);
        assert!(outcome.metadata.error.unwrap().contains("min_parties"));
    }

    #[tokio::test]
    async fn test_empty_and_non_tabular_input() {
        let (_, processor) = fixture();

        let outcome = processor.process(dp_request(Vec::new())).await;
        assert_eq!(outcome.metadata.status, InsightStatus::Error);

        let outcome = processor
            .process(dp_request(vec![json!("not-a-row")]))
            .await;
        assert_eq!(outcome.metadata.status, InsightStatus::Error);
        assert!(outcome.metadata.error.unwrap().contains("tabular"));
    }

    #[tokio::test]
    async fn test_metadata_never_contains_raw_values() {
        let (_, processor) = fixture();
        let outcome = processor.process(dp_request(store_visits(&["secret-user"]))).await;
        let metadata_json = serde_json::to_string(&outcome.metadata).unwrap();
        assert!(!metadata_json.contains("secret-user"));
    }
}
