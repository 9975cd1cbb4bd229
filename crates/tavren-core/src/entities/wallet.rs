//! Reward and payout entities
//!
//! Reward bookkeeping itself is handled elsewhere; the DSR engine needs
//! these records to enumerate, export, and selectively delete them, and the
//! payout status transition rule backs the CONFLICT error kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reward {
    pub id: i64,
    pub user_id: String,
    pub offer_id: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Paid,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Paid => "paid",
            PayoutStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PayoutStatus::Pending),
            "paid" => Some(PayoutStatus::Paid),
            "failed" => Some(PayoutStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub id: i64,
    pub user_id: String,
    pub amount: f64,
    pub status: PayoutStatus,
    pub timestamp: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl PayoutRequest {
    /// Transition to paid; only a pending payout may be marked paid
    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.status != PayoutStatus::Pending {
            return Err(CoreError::conflict(format!(
                "Payout {} is {} and cannot be marked paid",
                self.id,
                self.status.as_str()
            )));
        }
        self.status = PayoutStatus::Paid;
        self.paid_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payout(status: PayoutStatus) -> PayoutRequest {
        PayoutRequest {
            id: 1,
            user_id: "u1".into(),
            amount: 12.5,
            status,
            timestamp: Utc::now(),
            paid_at: None,
        }
    }

    #[test]
    fn test_mark_paid_from_pending() {
        let mut p = payout(PayoutStatus::Pending);
        p.mark_paid(Utc::now()).unwrap();
        assert_eq!(p.status, PayoutStatus::Paid);
        assert!(p.paid_at.is_some());
    }

    #[test]
    fn test_mark_paid_conflict() {
        let mut p = payout(PayoutStatus::Paid);
        let err = p.mark_paid(Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }
}
