//! MCP usage policy attached to package metadata
//!
//! Informational for the buyer's compliance tooling; C6 does not enforce
//! it.

use serde_json::{json, Value};

use crate::entities::{AccessLevel, TrustTier};

/// Usage policy for a package, keyed by access level and trust tier
pub fn usage_policy(access_level: AccessLevel, trust_tier: TrustTier) -> Value {
    let permitted: Vec<&str> = match access_level {
        AccessLevel::PrecisePersistent => vec!["analytics", "personalization", "research"],
        AccessLevel::PreciseShortTerm => vec!["analytics", "transient_personalization"],
        AccessLevel::AnonymousPersistent => vec!["analytics", "aggregated_insights"],
        AccessLevel::AnonymousShortTerm => vec!["single_use_analytics"],
    };

    let audit_frequency = match trust_tier {
        TrustTier::Low => "weekly",
        TrustTier::Standard => "monthly",
        TrustTier::High => "quarterly",
    };

    json!({
        "permitted_use": permitted,
        "prohibited_use": ["resale", "unauthorized_sharing"],
        "data_retention": if access_level.is_short_term() { "24_hours" } else { "30_days" },
        "deletion_required": true,
        "audit_required": true,
        "audit_frequency": audit_frequency,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permitted_use_per_access_level() {
        let policy = usage_policy(AccessLevel::AnonymousShortTerm, TrustTier::Standard);
        assert_eq!(
            policy["permitted_use"],
            serde_json::json!(["single_use_analytics"])
        );
        assert_eq!(policy["data_retention"], "24_hours");
    }

    #[test]
    fn test_prohibitions_always_present() {
        for access in [
            AccessLevel::PrecisePersistent,
            AccessLevel::PreciseShortTerm,
            AccessLevel::AnonymousPersistent,
            AccessLevel::AnonymousShortTerm,
        ] {
            let policy = usage_policy(access, TrustTier::High);
            let prohibited = policy["prohibited_use"].as_array().unwrap();
            assert!(prohibited.iter().any(|v| v == "resale"));
            assert!(prohibited.iter().any(|v| v == "unauthorized_sharing"));
        }
    }

    #[test]
    fn test_audit_cadence_per_tier() {
        assert_eq!(
            usage_policy(AccessLevel::PrecisePersistent, TrustTier::Low)["audit_frequency"],
            "weekly"
        );
        assert_eq!(
            usage_policy(AccessLevel::PrecisePersistent, TrustTier::Standard)["audit_frequency"],
            "monthly"
        );
        assert_eq!(
            usage_policy(AccessLevel::PrecisePersistent, TrustTier::High)["audit_frequency"],
            "quarterly"
        );
    }
}
