//! Verifiable consent export packages
//!
//! Assembles a user's profile summary, full consent event list (with
//! hashes), DSR action log, optional PET query log, and a derived consent
//! summary, then seals the bundle with a canonical SHA-256 hash and an
//! HMAC-SHA256 signature over that hash.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::consent::ledger::ConsentLedgerService;
use crate::crypto::{hmac_sign, hmac_verify, sha256_hex};
use crate::entities::consent::{ConsentAction, ConsentEvent};
use crate::errors::{CoreError, CoreResult};
use crate::store::UserStore;

/// Export format version
const EXPORT_VERSION: &str = "1.0";

/// Serialize a JSON value with object keys emitted in sorted order, so the
/// hash is independent of map implementation and field declaration order.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serializes"));
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&serde_json::to_string(other).expect("scalar serializes")),
    }
}

/// Summary of a user's consent posture derived from the event stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentSummary {
    pub active_consents: Vec<Value>,
    pub consent_history: ConsentCounts,
    pub first_consent: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentCounts {
    pub granted: usize,
    pub withdrawn: usize,
    pub expired: usize,
}

/// A signed, verifiable export of one user's consent and processing history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportBundle {
    pub export_id: String,
    pub export_timestamp: DateTime<Utc>,
    pub export_version: String,
    pub user_id: String,
    pub user_details: Value,
    pub consent_summary: ConsentSummary,
    pub consent_events: Vec<Value>,
    pub dsr_actions: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pet_queries: Option<Vec<Value>>,
    pub metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Builds and verifies signed export packages
pub struct ConsentExportService {
    ledger: Arc<ConsentLedgerService>,
    users: Arc<dyn UserStore>,
    hmac_key: Vec<u8>,
}

impl ConsentExportService {
    pub fn new(
        ledger: Arc<ConsentLedgerService>,
        users: Arc<dyn UserStore>,
        hmac_key: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            ledger,
            users,
            hmac_key: hmac_key.into(),
        }
    }

    /// Generate a comprehensive, verifiable export package for a user.
    ///
    /// Partial data collection (a missing PET log) annotates the bundle
    /// instead of failing the export.
    pub async fn generate_export_package(
        &self,
        user_id: &str,
        include_pet_queries: bool,
        sign_export: bool,
    ) -> CoreResult<ExportBundle> {
        let started = std::time::Instant::now();
        info!(user_id, "Generating consent export");

        let user = self
            .users
            .find_by_username(user_id)
            .await?
            .ok_or_else(|| CoreError::not_found("User", user_id))?;

        let events = self.ledger.user_history(user_id).await?;
        debug!(count = events.len(), "Retrieved consent events");

        let dsr_actions: Vec<Value> = events
            .iter()
            .filter(|e| e.action == ConsentAction::DsrRequest)
            .map(format_dsr_action)
            .collect();

        let mut annotations: Vec<String> = Vec::new();
        let pet_queries = if include_pet_queries {
            // The PET query log lives with the insight subsystem; absence
            // is annotated, not fatal.
            warn!(user_id, "PET query log unavailable; continuing export");
            annotations.push("pet_queries_unavailable".to_string());
            Some(Vec::new())
        } else {
            None
        };

        let consent_summary = build_consent_summary(&events);

        let mut bundle = ExportBundle {
            export_id: Uuid::new_v4().to_string(),
            export_timestamp: Utc::now(),
            export_version: EXPORT_VERSION.to_string(),
            user_id: user_id.to_string(),
            user_details: user.export_view(),
            consent_summary,
            consent_events: events.iter().map(format_event).collect(),
            dsr_actions,
            pet_queries,
            metadata: serde_json::json!({
                "record_counts": {
                    "consent_events": events.len(),
                    "dsr_actions": events
                        .iter()
                        .filter(|e| e.action == ConsentAction::DsrRequest)
                        .count(),
                },
                "annotations": annotations,
            }),
            export_hash: None,
            signature: None,
        };

        let hash = self.calculate_hash(&bundle)?;
        bundle.export_hash = Some(hash.clone());

        if sign_export {
            bundle.signature = Some(hmac_sign(&self.hmac_key, hash.as_bytes()));
        }

        info!(
            user_id,
            export_id = %bundle.export_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Export generated"
        );
        Ok(bundle)
    }

    /// Canonical SHA-256 of the bundle with hash and signature stripped
    fn calculate_hash(&self, bundle: &ExportBundle) -> CoreResult<String> {
        let mut value = serde_json::to_value(bundle)?;
        if let Value::Object(map) = &mut value {
            map.remove("export_hash");
            map.remove("signature");
        }
        Ok(sha256_hex(canonical_json(&value).as_bytes()))
    }

    /// Verify an export package: recompute the canonical hash and compare
    /// the HMAC in constant time. Any single-field mutation after signing
    /// fails verification.
    pub fn verify_export(&self, bundle: &ExportBundle) -> CoreResult<bool> {
        let (hash, signature) = match (&bundle.export_hash, &bundle.signature) {
            (Some(hash), Some(signature)) => (hash, signature),
            _ => return Ok(false),
        };

        let expected_hash = self.calculate_hash(bundle)?;
        if *hash != expected_hash {
            return Ok(false);
        }

        Ok(hmac_verify(&self.hmac_key, hash.as_bytes(), signature))
    }
}

fn format_event(event: &ConsentEvent) -> Value {
    serde_json::json!({
        "event_id": event.id,
        "timestamp": event.timestamp,
        "action": event.action.as_str(),
        "scope": event.scope,
        "purpose": event.purpose,
        "offer_id": event.offer_id,
        "initiated_by": event.initiated_by.as_str(),
        "metadata": event.metadata,
        "prev_hash": event.prev_hash,
        "verification_hash": event.hash,
    })
}

fn format_dsr_action(event: &ConsentEvent) -> Value {
    serde_json::json!({
        "action_id": event.id,
        "timestamp": event.timestamp,
        "action_type": event.dsr_type(),
        "scope": event.scope,
        "metadata": event.metadata,
    })
}

fn build_consent_summary(events: &[ConsentEvent]) -> ConsentSummary {
    if events.is_empty() {
        return ConsentSummary {
            active_consents: Vec::new(),
            consent_history: ConsentCounts {
                granted: 0,
                withdrawn: 0,
                expired: 0,
            },
            first_consent: None,
            last_update: None,
        };
    }

    let mut active: std::collections::BTreeMap<(String, String), DateTime<Utc>> =
        std::collections::BTreeMap::new();
    let mut counts = ConsentCounts {
        granted: 0,
        withdrawn: 0,
        expired: 0,
    };
    let mut first = events[0].timestamp;
    let mut last = events[0].timestamp;

    for event in events {
        first = first.min(event.timestamp);
        last = last.max(event.timestamp);

        let key = (
            event.scope_or_all().to_string(),
            event.purpose_or_all().to_string(),
        );
        if event.action.grants_consent() {
            counts.granted += 1;
            active.insert(key, event.timestamp);
        } else if event.action.revokes_consent() {
            counts.withdrawn += 1;
            active.remove(&key);
        }
    }

    ConsentSummary {
        active_consents: active
            .into_iter()
            .map(|((scope, purpose), granted_at)| {
                serde_json::json!({
                    "scope": scope,
                    "purpose": purpose,
                    "granted_at": granted_at,
                })
            })
            .collect(),
        consent_history: counts,
        first_consent: Some(first),
        last_update: Some(last),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::ledger::LedgerJournal;
    use crate::entities::consent::ConsentEventDraft;
    use crate::entities::User;
    use crate::store::memory::{MemoryConsentStore, MemoryUserStore};

    fn fixture() -> (Arc<ConsentLedgerService>, ConsentExportService) {
        let path = std::env::temp_dir().join(format!("tavren-export-{}.jsonl", Uuid::new_v4()));
        let ledger = Arc::new(ConsentLedgerService::new(
            Arc::new(MemoryConsentStore::new()),
            LedgerJournal::new(path),
        ));
        let users = Arc::new(MemoryUserStore::new());
        users.insert(User {
            id: 1,
            username: "u1".into(),
            email: "u1@example.com".into(),
            is_active: true,
        });
        let export = ConsentExportService::new(ledger.clone(), users, b"test-export-key".to_vec());
        (ledger, export)
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = serde_json::json!({"b": 1, "a": {"z": true, "m": [1, 2]}});
        assert_eq!(canonical_json(&value), r#"{"a":{"m":[1,2],"z":true},"b":1}"#);
    }

    #[tokio::test]
    async fn test_export_sign_verify_round_trip() {
        let (ledger, export) = fixture();
        ledger
            .record_event(
                ConsentEventDraft::new("u1", ConsentAction::OptIn)
                    .with_scope("location")
                    .with_purpose("insight_generation"),
            )
            .await
            .unwrap();

        let bundle = export
            .generate_export_package("u1", false, true)
            .await
            .unwrap();
        assert!(bundle.export_hash.is_some());
        assert!(bundle.signature.is_some());
        assert!(export.verify_export(&bundle).unwrap());
    }

    #[tokio::test]
    async fn test_mutation_breaks_verification() {
        let (ledger, export) = fixture();
        ledger
            .record_event(ConsentEventDraft::new("u1", ConsentAction::OptIn))
            .await
            .unwrap();

        let mut bundle = export
            .generate_export_package("u1", false, true)
            .await
            .unwrap();
        bundle.user_id = "u2".to_string();
        assert!(!export.verify_export(&bundle).unwrap());
    }

    #[tokio::test]
    async fn test_unsigned_bundle_does_not_verify() {
        let (ledger, export) = fixture();
        ledger
            .record_event(ConsentEventDraft::new("u1", ConsentAction::OptIn))
            .await
            .unwrap();

        let bundle = export
            .generate_export_package("u1", false, false)
            .await
            .unwrap();
        assert!(bundle.signature.is_none());
        assert!(!export.verify_export(&bundle).unwrap());
    }

    #[tokio::test]
    async fn test_unknown_user_fails() {
        let (_, export) = fixture();
        let err = export
            .generate_export_package("nobody", false, true)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_summary_counts() {
        let (ledger, export) = fixture();
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
                    .with_purpose("insight_generation"),
            )
            .await
            .unwrap();

        let bundle = export
            .generate_export_package("u1", false, true)
            .await
            .unwrap();
        assert_eq!(bundle.consent_summary.consent_history.granted, 1);
        assert_eq!(bundle.consent_summary.consent_history.withdrawn, 1);
        assert!(bundle.consent_summary.active_consents.is_empty());
        assert!(bundle.consent_summary.first_consent.is_some());
    }

    #[tokio::test]
    async fn test_pet_query_absence_is_annotated() {
        let (ledger, export) = fixture();
        ledger
            .record_event(ConsentEventDraft::new("u1", ConsentAction::OptIn))
            .await
            .unwrap();

        let bundle = export
            .generate_export_package("u1", true, true)
            .await
            .unwrap();
        assert_eq!(bundle.pet_queries.as_deref(), Some(&[] as &[Value]));
        let annotations = bundle.metadata["annotations"].as_array().unwrap();
        assert!(annotations
            .iter()
            .any(|a| a == "pet_queries_unavailable"));
    }
}
