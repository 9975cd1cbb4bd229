//! Data package domain types
//!
//! A data package is the ephemeral artifact returned to a buyer: access
//! tiered, anonymized, and carried by a time-limited capability token.
//! The audit record outlives the package content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, CoreResult};

/// Buyer-requested combination of precision and retention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    PrecisePersistent,
    PreciseShortTerm,
    AnonymousPersistent,
    AnonymousShortTerm,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::PrecisePersistent => "precise_persistent",
            AccessLevel::PreciseShortTerm => "precise_short_term",
            AccessLevel::AnonymousPersistent => "anonymous_persistent",
            AccessLevel::AnonymousShortTerm => "anonymous_short_term",
        }
    }

    pub fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "precise_persistent" => Ok(AccessLevel::PrecisePersistent),
            "precise_short_term" => Ok(AccessLevel::PreciseShortTerm),
            "anonymous_persistent" => Ok(AccessLevel::AnonymousPersistent),
            "anonymous_short_term" => Ok(AccessLevel::AnonymousShortTerm),
            other => Err(CoreError::validation(format!(
                "Unknown access level: {}",
                other
            ))),
        }
    }

    /// Short-term packages expire after 24 hours, persistent ones after 30
    /// days
    pub fn is_short_term(&self) -> bool {
        matches!(
            self,
            AccessLevel::PreciseShortTerm | AccessLevel::AnonymousShortTerm
        )
    }
}

/// Buyer reputation bucket derived from decline history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    Low,
    Standard,
    High,
}

impl TrustTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustTier::Low => "low",
            TrustTier::Standard => "standard",
            TrustTier::High => "high",
        }
    }

    pub fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "low" => Ok(TrustTier::Low),
            "standard" => Ok(TrustTier::Standard),
            "high" => Ok(TrustTier::High),
            other => Err(CoreError::validation(format!(
                "Unknown trust tier: {}",
                other
            ))),
        }
    }
}

impl Default for TrustTier {
    fn default() -> Self {
        TrustTier::Standard
    }
}

/// The transform actually applied to package content, derived from access
/// level and buyer trust tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnonymizationLevel {
    Minimal,
    Moderate,
    StrongWithLongitudinal,
    Strong,
}

impl AnonymizationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnonymizationLevel::Minimal => "minimal",
            AnonymizationLevel::Moderate => "moderate",
            AnonymizationLevel::StrongWithLongitudinal => "strong_with_longitudinal",
            AnonymizationLevel::Strong => "strong",
        }
    }
}

/// Anonymization level as a pure function of access level and trust tier
pub fn anonymization_level(access_level: AccessLevel, trust_tier: TrustTier) -> AnonymizationLevel {
    use AccessLevel::*;
    use AnonymizationLevel::*;
    use TrustTier::*;

    match (access_level, trust_tier) {
        (PrecisePersistent, Low) => Moderate,
        (PrecisePersistent, Standard) => Minimal,
        (PrecisePersistent, High) => Minimal,
        (PreciseShortTerm, Low) => StrongWithLongitudinal,
        (PreciseShortTerm, Standard) => Moderate,
        (PreciseShortTerm, High) => Minimal,
        (AnonymousPersistent, Low) => Strong,
        (AnonymousPersistent, Standard) => StrongWithLongitudinal,
        (AnonymousPersistent, High) => Moderate,
        (AnonymousShortTerm, Low) => Strong,
        (AnonymousShortTerm, Standard) => Strong,
        (AnonymousShortTerm, High) => StrongWithLongitudinal,
    }
}

/// Package content: either clear records or an encrypted blob
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackageContent {
    Records(Vec<serde_json::Value>),
    Encrypted(String),
}

impl PackageContent {
    pub fn record_count(&self) -> usize {
        match self {
            PackageContent::Records(records) => records.len(),
            PackageContent::Encrypted(_) => 0,
        }
    }
}

/// Metadata attached to every data package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub record_count: usize,
    pub schema_version: String,
    pub data_quality_score: f64,
    pub buyer_id: Option<String>,
    pub trust_tier: TrustTier,
    pub encryption_status: String,
    pub mcp_context: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

/// A packaged, access-tiered slice of user data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPackage {
    pub tavren_data_package: String,
    pub package_id: String,
    pub consent_id: i64,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub data_type: String,
    pub access_level: AccessLevel,
    pub anonymization_level: AnonymizationLevel,
    pub purpose: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub access_token: Option<String>,
    pub content: PackageContent,
    pub metadata: PackageMetadata,
}

impl DataPackage {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Package lifecycle operations recorded in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    Created,
    Accessed,
    Expired,
    ValidationFailed,
    Denied,
}

impl AuditOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::Created => "created",
            AuditOperation::Accessed => "accessed",
            AuditOperation::Expired => "expired",
            AuditOperation::ValidationFailed => "validation_failed",
            AuditOperation::Denied => "denied",
        }
    }
}

/// Immutable audit record, appended for every package operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageAuditRecord {
    pub timestamp: DateTime<Utc>,
    pub operation: AuditOperation,
    pub package_id: String,
    pub user_id: String,
    pub consent_id: i64,
    pub buyer_id: Option<String>,
    pub data_type: String,
    pub access_level: String,
    pub anonymization_level: String,
    pub record_count: usize,
    pub purpose: String,
    pub status: String,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
}
