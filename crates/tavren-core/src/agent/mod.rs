//! Agent-to-agent (A2A) protocol handling
//!
//! Validates inbound agent messages, checks data requests against the
//! user's preference profile and the consent validator, and composes
//! responses. Accepted requests get a fresh consent event and a capability
//! URL pointing at the payload endpoint; declined requests may carry an
//! alternative access level the user has previously accepted.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::consent::ledger::ConsentLedgerService;
use crate::consent::validator::ConsentValidator;
use crate::entities::consent::{ConsentAction, ConsentEventDraft, InitiatedBy};
use crate::errors::{CoreError, CoreResult};
use crate::store::{AgentLogStore, UserPreferenceStore};

/// Protocol version this handler speaks
pub const A2A_VERSION: &str = "1.0";

/// Agent identifier attached to responses
const AGENT_VERSION: &str = "tavren-agent-v3";

/// Fields every A2A message must carry
const REQUIRED_FIELDS: [&str; 7] = [
    "a2a_version",
    "message_id",
    "timestamp",
    "sender",
    "recipient",
    "message_type",
    "content",
];

/// Handles inbound A2A messages on behalf of users
pub struct AgentService {
    ledger: Arc<ConsentLedgerService>,
    validator: Arc<ConsentValidator>,
    preferences: Arc<dyn UserPreferenceStore>,
    log: Arc<dyn AgentLogStore>,
}

impl AgentService {
    pub fn new(
        ledger: Arc<ConsentLedgerService>,
        validator: Arc<ConsentValidator>,
        preferences: Arc<dyn UserPreferenceStore>,
        log: Arc<dyn AgentLogStore>,
    ) -> Self {
        Self {
            ledger,
            validator,
            preferences,
            log,
        }
    }

    /// Process one inbound message and produce the response message
    pub async fn process_message(&self, message: Value) -> CoreResult<Value> {
        for field in REQUIRED_FIELDS {
            if message.get(field).is_none() {
                return Err(CoreError::validation(format!(
                    "Invalid message format: missing '{}'",
                    field
                )));
            }
        }

        let message_type = message["message_type"].as_str().unwrap_or_default();
        info!(message_type, "Processing agent message");

        let recipient = message["recipient"]
            .as_str()
            .ok_or_else(|| CoreError::validation("Invalid recipient: expected string"))?;
        let user_id = parse_recipient_user(recipient)?;

        let response = match message_type {
            "REQUEST" => self.handle_request(&message, &user_id).await?,
            "RESPONSE" => acknowledge(&message),
            other => {
                warn!(message_type = other, "Unsupported agent message type");
                information(
                    &message,
                    json!({
                        "status": "error",
                        "detail": format!("Unsupported message type: {}", other),
                    }),
                )
            }
        };

        let exchange = json!({
            "received_at": Utc::now(),
            "inbound_message_id": message["message_id"],
            "message_type": message_type,
            "response_message_id": response["message_id"],
        });
        if let Err(e) = self.log.append(&user_id, exchange).await {
            warn!(error = %e, "Agent exchange log append failed");
        }

        Ok(response)
    }

    async fn handle_request(&self, message: &Value, user_id: &str) -> CoreResult<Value> {
        let body = &message["content"]["body"];
        let data_type = body
            .get("data_type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CoreError::validation("Invalid request format: missing required field data_type")
            })?;
        let access_level = body
            .get("access_level")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                CoreError::validation(
                    "Invalid request format: missing required field access_level",
                )
            })?;
        let purpose = message["metadata"]["mcp_context"]["purpose"]
            .as_str()
            .unwrap_or("unspecified");

        let (aligned, reason) = self
            .check_alignment(user_id, data_type, access_level, purpose)
            .await;

        let mut response = base_response(message, "RESPONSE");
        response["content"]["body"] = json!({
            "request_id": message["message_id"],
            "status": if aligned { "accepted" } else { "declined" },
            "reason": reason,
        });
        response["metadata"] = json!({
            "epistemic_status": {
                "confidence": "high",
                "source": "tavren_consent_engine",
            },
            "mcp_context": message["metadata"].get("mcp_context").cloned().unwrap_or(Value::Null),
            "tavren": {
                "consent_id": Value::Null,
                "agent_version": AGENT_VERSION,
            },
        });

        if aligned {
            // Record the acceptance as a fresh consent event; the payload
            // endpoint verifies this exact consent id before packaging.
            let consent = self
                .ledger
                .record_event(
                    ConsentEventDraft::new(user_id, ConsentAction::Accepted)
                        .with_scope(data_type)
                        .with_purpose(purpose)
                        .initiated_by(InitiatedBy::Agent)
                        .with_metadata(json!({
                            "access_level": access_level,
                            "request_message_id": message["message_id"],
                        })),
                )
                .await?;

            response["metadata"]["tavren"]["consent_id"] = json!(consent.id);
            response["content"]["body"]["data_payload"] = json!({
                "format": "anonymized_json",
                "availability": "immediate",
                "access_url": format!("/api/agent/data/payload/{}", consent.id),
            });
            info!(user_id, consent_id = consent.id, "Agent request accepted");
        } else {
            // Suggest the user's preferred tier for this data type, if any
            if let Some(tiers) = self.preferences.accepted_tiers(user_id, data_type).await? {
                if let Some(alternative) = tiers.first() {
                    let compensation = body
                        .get("compensation")
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0);
                    response["content"]["body"]["alternative_suggestion"] = json!({
                        "data_type": data_type,
                        "access_level": alternative,
                        "estimated_compensation": (compensation * 0.8 * 100.0).round() / 100.0,
                    });
                }
            }
            info!(user_id, "Agent request declined");
        }

        Ok(response)
    }

    /// Preference and consent alignment for a request
    async fn check_alignment(
        &self,
        user_id: &str,
        data_type: &str,
        access_level: &str,
        purpose: &str,
    ) -> (bool, String) {
        match self.preferences.accepted_tiers(user_id, data_type).await {
            Ok(Some(tiers)) => {
                if !tiers.iter().any(|t| t == access_level) {
                    return (
                        false,
                        format!("Access level '{}' rejected for '{}'", access_level, data_type),
                    );
                }
            }
            Ok(None) => {
                match self.preferences.knows_data_type(user_id, data_type).await {
                    Ok(true) => {
                        // Profile row exists but carries no accepted tiers
                        return (
                            false,
                            format!("Data type '{}' not available for sharing", data_type),
                        );
                    }
                    Ok(false) => {
                        return (
                            false,
                            format!("User {} not found or has no preference profile", user_id),
                        );
                    }
                    Err(e) => {
                        warn!(error = %e, "Preference lookup failed; declining");
                        return (false, "Error validating consent alignment".to_string());
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Preference lookup failed; declining");
                return (false, "Error validating consent alignment".to_string());
            }
        }

        let decision = self
            .validator
            .is_processing_allowed(user_id, data_type, purpose)
            .await;
        if !decision.allowed {
            return (
                false,
                decision
                    .reason
                    .unwrap_or_else(|| "Consent check failed".to_string()),
            );
        }

        (true, "Request aligned with user consent preferences".to_string())
    }
}

/// Extract the user id from a recipient of the form
/// `agent:tavren/anon:<user_id>`
fn parse_recipient_user(recipient: &str) -> CoreResult<String> {
    let tail = recipient
        .rsplit('/')
        .next()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            CoreError::validation(format!("Invalid recipient format: {}", recipient))
        })?;
    let user_id = tail.strip_prefix("anon:").unwrap_or(tail);
    if user_id.is_empty() {
        return Err(CoreError::validation(format!(
            "Invalid recipient format: {}",
            recipient
        )));
    }
    Ok(user_id.to_string())
}

/// Response skeleton with sender/recipient swapped
fn base_response(message: &Value, message_type: &str) -> Value {
    json!({
        "a2a_version": message["a2a_version"],
        "message_id": Uuid::new_v4().to_string(),
        "timestamp": Utc::now(),
        "sender": message["recipient"],
        "recipient": message["sender"],
        "message_type": message_type,
        "content": {
            "format": "application/json",
            "body": {},
        },
    })
}

fn acknowledge(message: &Value) -> Value {
    let mut response = base_response(message, "INFORMATION");
    response["content"]["body"] = json!({
        "acknowledged": true,
        "response_id": message["message_id"],
    });
    response
}

fn information(message: &Value, body: Value) -> Value {
    let mut response = base_response(message, "INFORMATION");
    response["content"]["body"] = body;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::ledger::LedgerJournal;
    use crate::store::memory::{
        MemoryAgentLogStore, MemoryConsentStore, MemoryPreferenceStore,
    };

    struct Fixture {
        ledger: Arc<ConsentLedgerService>,
        prefs: Arc<MemoryPreferenceStore>,
        log: Arc<MemoryAgentLogStore>,
        service: AgentService,
    }

    fn fixture() -> Fixture {
        let path =
            std::env::temp_dir().join(format!("tavren-agent-{}.jsonl", Uuid::new_v4()));
        let ledger = Arc::new(ConsentLedgerService::new(
            Arc::new(MemoryConsentStore::new()),
            LedgerJournal::new(path),
        ));
        let validator = Arc::new(ConsentValidator::new(ledger.clone()));
        let prefs = Arc::new(MemoryPreferenceStore::new());
        let log = Arc::new(MemoryAgentLogStore::new());
        let service = AgentService::new(ledger.clone(), validator, prefs.clone(), log.clone());
        Fixture {
            ledger,
            prefs,
            log,
            service,
        }
    }

    fn request_message(user: &str, data_type: &str, access_level: &str) -> Value {
        json!({
            "a2a_version": A2A_VERSION,
            "message_id": "msg-1",
            "timestamp": Utc::now(),
            "sender": "agent:buyer/b1",
            "recipient": format!("agent:tavren/anon:{}", user),
            "message_type": "REQUEST",
            "content": {
                "format": "application/json",
                "body": {
                    "data_type": data_type,
                    "access_level": access_level,
                    "compensation": 1.5,
                },
            },
            "metadata": {
                "mcp_context": {"purpose": "insight_generation"},
            },
        })
    }

    async fn opt_in(f: &Fixture, user: &str, scope: &str) {
        f.ledger
            .record_event(
                ConsentEventDraft::new(user, ConsentAction::OptIn)
                    .with_scope(scope)
                    .with_purpose("all"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_field_rejected() {
        let f = fixture();
        let mut message = request_message("u1", "location", "anonymous_short_term");
        message.as_object_mut().unwrap().remove("sender");

        let err = f.service.process_message(message).await.unwrap_err();
        assert!(err.to_string().contains("missing 'sender'"));
    }

    #[tokio::test]
    async fn test_accepted_request_issues_capability_url() {
        let f = fixture();
        f.prefs
            .set_accepted("u1", "location", vec!["anonymous_short_term".into()]);
        opt_in(&f, "u1", "location").await;

        let response = f
            .service
            .process_message(request_message("u1", "location", "anonymous_short_term"))
            .await
            .unwrap();

        assert_eq!(response["message_type"], "RESPONSE");
        assert_eq!(response["content"]["body"]["status"], "accepted");

        let consent_id = response["metadata"]["tavren"]["consent_id"].as_i64().unwrap();
        let url = response["content"]["body"]["data_payload"]["access_url"]
            .as_str()
            .unwrap();
        assert_eq!(url, format!("/api/agent/data/payload/{}", consent_id));

        // The acceptance landed in the ledger
        let event = f.ledger.find_event(consent_id).await.unwrap().unwrap();
        assert_eq!(event.action, ConsentAction::Accepted);
        assert_eq!(event.user_id, "u1");
    }

    #[tokio::test]
    async fn test_rejected_tier_suggests_alternative() {
        let f = fixture();
        f.prefs
            .set_accepted("u1", "location", vec!["anonymous_short_term".into()]);
        opt_in(&f, "u1", "location").await;

        let response = f
            .service
            .process_message(request_message("u1", "location", "precise_persistent"))
            .await
            .unwrap();

        assert_eq!(response["content"]["body"]["status"], "declined");
        let suggestion = &response["content"]["body"]["alternative_suggestion"];
        assert_eq!(suggestion["access_level"], "anonymous_short_term");
        assert_eq!(suggestion["estimated_compensation"], 1.2);
    }

    #[tokio::test]
    async fn test_no_profile_declines() {
        let f = fixture();
        let response = f
            .service
            .process_message(request_message("ghost", "location", "anonymous_short_term"))
            .await
            .unwrap();
        assert_eq!(response["content"]["body"]["status"], "declined");
    }

    #[tokio::test]
    async fn test_revoked_consent_declines_despite_preferences() {
        let f = fixture();
        f.prefs
            .set_accepted("u1", "location", vec!["anonymous_short_term".into()]);
        opt_in(&f, "u1", "location").await;
        f.ledger
            .record_event(
                ConsentEventDraft::new("u1", ConsentAction::OptOut)
                    .with_scope("location")
                    .with_purpose("all"),
            )
            .await
            .unwrap();

        let response = f
            .service
            .process_message(request_message("u1", "location", "anonymous_short_term"))
            .await
            .unwrap();
        assert_eq!(response["content"]["body"]["status"], "declined");
    }

    #[tokio::test]
    async fn test_response_message_acknowledged() {
        let f = fixture();
        let mut message = request_message("u1", "location", "anonymous_short_term");
        message["message_type"] = json!("RESPONSE");

        let response = f.service.process_message(message).await.unwrap();
        assert_eq!(response["message_type"], "INFORMATION");
        assert_eq!(response["content"]["body"]["acknowledged"], true);
    }

    #[tokio::test]
    async fn test_exchanges_are_logged() {
        let f = fixture();
        f.prefs
            .set_accepted("u1", "location", vec!["anonymous_short_term".into()]);
        opt_in(&f, "u1", "location").await;
        f.service
            .process_message(request_message("u1", "location", "anonymous_short_term"))
            .await
            .unwrap();

        let log = f.log.for_user("u1").await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0]["message_type"], "REQUEST");
    }

    #[test]
    fn test_recipient_parsing() {
        assert_eq!(
            parse_recipient_user("agent:tavren/anon:u1").unwrap(),
            "u1"
        );
        assert_eq!(parse_recipient_user("agent:tavren/u1").unwrap(), "u1");
        assert!(parse_recipient_user("agent:tavren/").is_err());
    }
}
