//! DSR processing-restriction detection
//!
//! A restriction is recorded twice: a `dsr_request` event whose metadata
//! carries `dsr_type = "processing_restriction"` (the audit-rich record)
//! and an `opt_out` with `offer_id = "system_restriction"` (the cheap
//! always-visible guard). Either alone restricts the user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::consent::{ConsentAction, ConsentEvent, OFFER_SYSTEM_RESTRICTION, SCOPE_ALL};

/// DSR action type recorded in restriction metadata
pub const DSR_TYPE_RESTRICTION: &str = "processing_restriction";

/// Details of an active processing restriction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestrictionDetails {
    pub status: String,
    pub reason: String,
    pub restriction_type: String,
    pub applied_at: DateTime<Utc>,
    pub scope: String,
    pub restriction_id: i64,
}

/// Scan a user's history for either restriction sentinel. Returns the
/// first match; restrictions are monotonic, so one is enough to deny.
pub fn find_restriction(events: &[ConsentEvent]) -> Option<RestrictionDetails> {
    for event in events {
        if event.action == ConsentAction::DsrRequest && event.dsr_type() == Some(DSR_TYPE_RESTRICTION)
        {
            return Some(RestrictionDetails {
                status: "restricted".to_string(),
                reason: "DSR processing restriction".to_string(),
                restriction_type: "dsr_request".to_string(),
                applied_at: event.timestamp,
                scope: event.scope_or_all().to_string(),
                restriction_id: event.id,
            });
        }

        if event.action == ConsentAction::OptOut
            && event.offer_id.as_deref() == Some(OFFER_SYSTEM_RESTRICTION)
        {
            return Some(RestrictionDetails {
                status: "restricted".to_string(),
                reason: "DSR global opt-out".to_string(),
                restriction_type: "system_restriction".to_string(),
                applied_at: event.timestamp,
                scope: event.scope.as_deref().unwrap_or(SCOPE_ALL).to_string(),
                restriction_id: event.id,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::consent::InitiatedBy;

    fn event(id: i64, action: ConsentAction) -> ConsentEvent {
        ConsentEvent {
            id,
            user_id: "u1".into(),
            offer_id: None,
            action,
            scope: None,
            purpose: None,
            initiated_by: InitiatedBy::User,
            timestamp: Utc::now(),
            reason: None,
            reason_category: None,
            metadata: None,
            prev_hash: "0".into(),
            hash: String::new(),
        }
    }

    #[test]
    fn test_no_restriction_in_plain_history() {
        let events = vec![event(1, ConsentAction::OptIn), event(2, ConsentAction::OptOut)];
        assert!(find_restriction(&events).is_none());
    }

    #[test]
    fn test_dsr_request_sentinel() {
        let mut restricted = event(2, ConsentAction::DsrRequest);
        restricted.metadata = Some(serde_json::json!({"dsr_type": DSR_TYPE_RESTRICTION}));

        let events = vec![event(1, ConsentAction::OptIn), restricted];
        let details = find_restriction(&events).unwrap();
        assert_eq!(details.restriction_type, "dsr_request");
        assert_eq!(details.restriction_id, 2);
    }

    #[test]
    fn test_system_restriction_sentinel() {
        let mut restricted = event(3, ConsentAction::OptOut);
        restricted.offer_id = Some(OFFER_SYSTEM_RESTRICTION.into());
        restricted.scope = Some("all".into());

        let events = vec![event(1, ConsentAction::OptIn), restricted];
        let details = find_restriction(&events).unwrap();
        assert_eq!(details.restriction_type, "system_restriction");
        assert_eq!(details.scope, "all");
    }

    #[test]
    fn test_dsr_request_without_restriction_metadata_is_not_restricting() {
        let mut export_audit = event(2, ConsentAction::DsrRequest);
        export_audit.metadata = Some(serde_json::json!({"dsr_type": "data_export"}));

        let events = vec![event(1, ConsentAction::OptIn), export_audit];
        assert!(find_restriction(&events).is_none());
    }

    #[test]
    fn test_plain_opt_out_is_not_a_restriction() {
        let mut opt_out = event(2, ConsentAction::OptOut);
        opt_out.offer_id = Some("offer-123".into());
        assert!(find_restriction(&[opt_out]).is_none());
    }
}
