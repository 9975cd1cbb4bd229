//! Storage traits implemented by the database crate
//!
//! Services depend on these seams rather than on a concrete backend, so
//! they can run against SeaORM in production and against the in-memory
//! implementations in tests and development.

pub mod memory;
pub mod mock_data;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{
    ConsentEvent, ConsentEventDraft, DataPackage, PackageAuditRecord, PayoutRequest, Reward, User,
};
use crate::errors::CoreResult;

/// Append-only store behind the consent ledger.
///
/// `append_chained` must serialize appends per user: the implementation
/// holds a storage-level exclusive section (row or advisory lock keyed by
/// the user id) across read-latest, hash, insert, so the `prev_hash` chain
/// stays linear even under concurrent writers. Appends for different users
/// proceed in parallel.
#[async_trait]
pub trait ConsentEventStore: Send + Sync {
    /// Insert a new event, assigning id and timestamp and computing the
    /// hash chain under the per-user append lock
    async fn append_chained(&self, draft: ConsentEventDraft) -> CoreResult<ConsentEvent>;

    /// All events for a user, ordered by timestamp then id
    async fn history(&self, user_id: &str) -> CoreResult<Vec<ConsentEvent>>;

    /// Look up one event by id
    async fn find_by_id(&self, id: i64) -> CoreResult<Option<ConsentEvent>>;

    /// All decline events, for the buyer trust service
    async fn declined_events(&self) -> CoreResult<Vec<ConsentEvent>>;

    /// Delete every event for a user. Takes the same per-user lock as
    /// `append_chained` so in-flight appends drain first. Only the explicit
    /// DSR consent-deletion path calls this.
    async fn delete_user_events(&self, user_id: &str) -> CoreResult<u64>;

    /// Remove a single event. Only the ledger's journal-failure rollback
    /// path calls this.
    async fn remove(&self, id: i64) -> CoreResult<bool>;
}

/// User profile lookups for DSR export and deletion
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> CoreResult<Option<User>>;
    async fn delete_by_username(&self, username: &str) -> CoreResult<bool>;
}

/// Reward history for DSR export and deletion
#[async_trait]
pub trait RewardStore: Send + Sync {
    async fn history(&self, user_id: &str) -> CoreResult<Vec<Reward>>;
    async fn delete_for_user(&self, user_id: &str) -> CoreResult<u64>;
}

/// Payout history; preserved across DSR deletion for financial records
#[async_trait]
pub trait PayoutStore: Send + Sync {
    async fn history(&self, user_id: &str) -> CoreResult<Vec<PayoutRequest>>;
    async fn mark_paid(&self, id: i64, now: DateTime<Utc>) -> CoreResult<PayoutRequest>;
}

/// Persistence for created data packages; content is gone once expired,
/// the audit trail is not
#[async_trait]
pub trait PackageStore: Send + Sync {
    async fn save(&self, package: &DataPackage) -> CoreResult<()>;
    async fn find(&self, package_id: &str) -> CoreResult<Option<DataPackage>>;
}

/// Append-only audit trail for package operations
#[async_trait]
pub trait PackageAuditStore: Send + Sync {
    async fn append(&self, record: PackageAuditRecord) -> CoreResult<()>;
    async fn for_package(&self, package_id: &str) -> CoreResult<Vec<PackageAuditRecord>>;
}

/// Upstream source of raw user records per data type. Records are
/// semi-structured JSON objects with at least a `timestamp` field when
/// temporal.
#[async_trait]
pub trait UserDataSource: Send + Sync {
    async fn fetch(&self, user_id: &str, data_type: &str) -> CoreResult<Vec<serde_json::Value>>;
}

/// Per-user consent preference profile consulted by the agent protocol
/// handler
#[async_trait]
pub trait UserPreferenceStore: Send + Sync {
    /// Access tiers the user has accepted for a data type, most preferred
    /// first. `None` when the user has no preference profile.
    async fn accepted_tiers(
        &self,
        user_id: &str,
        data_type: &str,
    ) -> CoreResult<Option<Vec<String>>>;

    /// Whether the user has any preference entry for the data type
    async fn knows_data_type(&self, user_id: &str, data_type: &str) -> CoreResult<bool>;
}

/// Record of A2A message exchanges for the agent log endpoint
#[async_trait]
pub trait AgentLogStore: Send + Sync {
    async fn append(&self, user_id: &str, exchange: serde_json::Value) -> CoreResult<()>;
    async fn for_user(&self, user_id: &str) -> CoreResult<Vec<serde_json::Value>>;
}
