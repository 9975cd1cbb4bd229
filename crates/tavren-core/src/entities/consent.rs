//! Consent event domain types
//!
//! A consent event is an immutable, hash-chained record of a user's consent
//! decision at a point in time. Events are appended by the consent ledger
//! and never updated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel offer id marking a system-initiated processing restriction.
/// An `opt_out` carrying this offer id denies all processing for the user.
pub const OFFER_SYSTEM_RESTRICTION: &str = "system_restriction";

/// Sentinel offer id marking a DSR audit-trail event
pub const OFFER_DSR_AUDIT: &str = "dsr_audit";

/// Scope/purpose wildcard covering every scope or purpose
pub const SCOPE_ALL: &str = "all";

/// Consent actions recorded in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentAction {
    OptIn,
    OptOut,
    Withdraw,
    GrantPartial,
    DsrRequest,
    /// Offer-level acceptance recorded by the agent flow
    Accepted,
    /// Offer-level decline; feeds the buyer trust service
    Declined,
}

impl ConsentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentAction::OptIn => "opt_in",
            ConsentAction::OptOut => "opt_out",
            ConsentAction::Withdraw => "withdraw",
            ConsentAction::GrantPartial => "grant_partial",
            ConsentAction::DsrRequest => "dsr_request",
            ConsentAction::Accepted => "accepted",
            ConsentAction::Declined => "declined",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "opt_in" => Some(ConsentAction::OptIn),
            "opt_out" => Some(ConsentAction::OptOut),
            "withdraw" => Some(ConsentAction::Withdraw),
            "grant_partial" => Some(ConsentAction::GrantPartial),
            "dsr_request" => Some(ConsentAction::DsrRequest),
            "accepted" => Some(ConsentAction::Accepted),
            "declined" => Some(ConsentAction::Declined),
            _ => None,
        }
    }

    /// Actions that grant processing permission
    pub fn grants_consent(&self) -> bool {
        matches!(
            self,
            ConsentAction::OptIn | ConsentAction::GrantPartial | ConsentAction::Accepted
        )
    }

    /// Actions that revoke processing permission
    pub fn revokes_consent(&self) -> bool {
        matches!(self, ConsentAction::OptOut | ConsentAction::Withdraw)
    }
}

/// Who initiated a consent event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitiatedBy {
    User,
    UserDsr,
    System,
    Agent,
}

impl InitiatedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitiatedBy::User => "user",
            InitiatedBy::UserDsr => "user_dsr",
            InitiatedBy::System => "system",
            InitiatedBy::Agent => "agent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(InitiatedBy::User),
            "user_dsr" => Some(InitiatedBy::UserDsr),
            "system" => Some(InitiatedBy::System),
            "agent" => Some(InitiatedBy::Agent),
            _ => None,
        }
    }
}

impl Default for InitiatedBy {
    fn default() -> Self {
        InitiatedBy::User
    }
}

/// An immutable ledger record with its hash-chain linkage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentEvent {
    pub id: i64,
    pub user_id: String,
    pub offer_id: Option<String>,
    pub action: ConsentAction,
    pub scope: Option<String>,
    pub purpose: Option<String>,
    pub initiated_by: InitiatedBy,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
    pub reason_category: Option<String>,
    pub metadata: Option<serde_json::Value>,
    /// Hash of the previous event for this user, or "0" for the first
    pub prev_hash: String,
    pub hash: String,
}

impl ConsentEvent {
    /// Scope, defaulting to the wildcard when unset
    pub fn scope_or_all(&self) -> &str {
        self.scope.as_deref().unwrap_or(SCOPE_ALL)
    }

    /// Purpose, defaulting to the wildcard when unset
    pub fn purpose_or_all(&self) -> &str {
        self.purpose.as_deref().unwrap_or(SCOPE_ALL)
    }

    /// Whether this event matches the given scope, accepting wildcards
    pub fn matches_scope(&self, scope: &str) -> bool {
        match self.scope.as_deref() {
            Some(s) => s == scope || s == SCOPE_ALL,
            None => false,
        }
    }

    /// Whether this event matches the given purpose, accepting wildcards
    /// and treating an unset purpose as matching everything
    pub fn matches_purpose(&self, purpose: &str) -> bool {
        match self.purpose.as_deref() {
            Some(p) => p == purpose || p == SCOPE_ALL,
            None => true,
        }
    }

    /// String value stored in the `dsr_type` metadata key, if any
    pub fn dsr_type(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("dsr_type"))
            .and_then(|v| v.as_str())
    }
}

/// Fields supplied by callers when recording a new event. The ledger
/// assigns the id, timestamp, and hash chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentEventDraft {
    pub user_id: String,
    pub offer_id: Option<String>,
    pub action: ConsentAction,
    pub scope: Option<String>,
    pub purpose: Option<String>,
    #[serde(default)]
    pub initiated_by: InitiatedBy,
    pub reason: Option<String>,
    pub reason_category: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl ConsentEventDraft {
    /// Start a draft with the minimum required fields
    pub fn new(user_id: impl Into<String>, action: ConsentAction) -> Self {
        Self {
            user_id: user_id.into(),
            offer_id: None,
            action,
            scope: None,
            purpose: None,
            initiated_by: InitiatedBy::User,
            reason: None,
            reason_category: None,
            metadata: None,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn with_offer_id(mut self, offer_id: impl Into<String>) -> Self {
        self.offer_id = Some(offer_id.into());
        self
    }

    pub fn initiated_by(mut self, initiated_by: InitiatedBy) -> Self {
        self.initiated_by = initiated_by;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_round_trip() {
        for action in [
            ConsentAction::OptIn,
            ConsentAction::OptOut,
            ConsentAction::Withdraw,
            ConsentAction::GrantPartial,
            ConsentAction::DsrRequest,
            ConsentAction::Accepted,
            ConsentAction::Declined,
        ] {
            assert_eq!(ConsentAction::from_str(action.as_str()), Some(action));
        }
        assert_eq!(ConsentAction::from_str("bogus"), None);
    }

    #[test]
    fn test_grant_and_revoke_classification() {
        assert!(ConsentAction::OptIn.grants_consent());
        assert!(ConsentAction::GrantPartial.grants_consent());
        assert!(ConsentAction::OptOut.revokes_consent());
        assert!(ConsentAction::Withdraw.revokes_consent());
        assert!(!ConsentAction::DsrRequest.grants_consent());
        assert!(!ConsentAction::DsrRequest.revokes_consent());
    }

    #[test]
    fn test_scope_matching() {
        let mut event = ConsentEvent {
            id: 1,
            user_id: "u1".into(),
            offer_id: None,
            action: ConsentAction::OptIn,
            scope: Some("location".into()),
            purpose: Some("insight_generation".into()),
            initiated_by: InitiatedBy::User,
            timestamp: Utc::now(),
            reason: None,
            reason_category: None,
            metadata: None,
            prev_hash: "0".into(),
            hash: String::new(),
        };

        assert!(event.matches_scope("location"));
        assert!(!event.matches_scope("health"));

        event.scope = Some(SCOPE_ALL.into());
        assert!(event.matches_scope("health"));

        event.purpose = None;
        assert!(event.matches_purpose("anything"));
    }

    #[test]
    fn test_draft_builder() {
        let draft = ConsentEventDraft::new("u1", ConsentAction::OptOut)
            .with_scope("all")
            .with_purpose("all")
            .with_offer_id(OFFER_SYSTEM_RESTRICTION)
            .initiated_by(InitiatedBy::UserDsr);

        assert_eq!(draft.user_id, "u1");
        assert_eq!(draft.offer_id.as_deref(), Some(OFFER_SYSTEM_RESTRICTION));
        assert_eq!(draft.initiated_by, InitiatedBy::UserDsr);
    }
}
