//! In-memory store implementations
//!
//! Back the unit tests and the development fallback. The consent store
//! serializes appends behind one mutex, which trivially satisfies the
//! per-user chain linearity requirement; production uses storage-level
//! advisory locks instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::consent::ledger::{chain_hash, timestamp_iso, GENESIS_HASH};
use crate::entities::{
    ConsentAction, ConsentEvent, ConsentEventDraft, DataPackage, PackageAuditRecord,
    PayoutRequest, Reward, User,
};
use crate::errors::{CoreError, CoreResult};
use crate::store::{
    AgentLogStore, ConsentEventStore, PackageAuditStore, PackageStore, PayoutStore, RewardStore,
    UserPreferenceStore, UserStore,
};

/// In-memory consent event store
#[derive(Default)]
pub struct MemoryConsentStore {
    events: Mutex<Vec<ConsentEvent>>,
    next_id: AtomicI64,
}

impl MemoryConsentStore {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl ConsentEventStore for MemoryConsentStore {
    async fn append_chained(&self, draft: ConsentEventDraft) -> CoreResult<ConsentEvent> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| CoreError::internal("Consent store lock poisoned"))?;

        let prev_hash = events
            .iter()
            .filter(|e| e.user_id == draft.user_id)
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)))
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let timestamp = Utc::now();
        let hash = chain_hash(
            id,
            &draft.user_id,
            draft.action.as_str(),
            &timestamp_iso(timestamp),
            &prev_hash,
        );

        let event = ConsentEvent {
            id,
            user_id: draft.user_id,
            offer_id: draft.offer_id,
            action: draft.action,
            scope: draft.scope,
            purpose: draft.purpose,
            initiated_by: draft.initiated_by,
            timestamp,
            reason: draft.reason,
            reason_category: draft.reason_category,
            metadata: draft.metadata,
            prev_hash,
            hash,
        };
        events.push(event.clone());
        Ok(event)
    }

    async fn history(&self, user_id: &str) -> CoreResult<Vec<ConsentEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|_| CoreError::internal("Consent store lock poisoned"))?;
        Ok(events
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: i64) -> CoreResult<Option<ConsentEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|_| CoreError::internal("Consent store lock poisoned"))?;
        Ok(events.iter().find(|e| e.id == id).cloned())
    }

    async fn declined_events(&self) -> CoreResult<Vec<ConsentEvent>> {
        let events = self
            .events
            .lock()
            .map_err(|_| CoreError::internal("Consent store lock poisoned"))?;
        Ok(events
            .iter()
            .filter(|e| e.action == ConsentAction::Declined)
            .cloned()
            .collect())
    }

    async fn delete_user_events(&self, user_id: &str) -> CoreResult<u64> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| CoreError::internal("Consent store lock poisoned"))?;
        let before = events.len();
        events.retain(|e| e.user_id != user_id);
        Ok((before - events.len()) as u64)
    }

    async fn remove(&self, id: i64) -> CoreResult<bool> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| CoreError::internal("Consent store lock poisoned"))?;
        let before = events.len();
        events.retain(|e| e.id != id);
        Ok(events.len() < before)
    }
}

/// In-memory user store
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<Vec<User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        self.users.lock().unwrap().push(user);
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_username(&self, username: &str) -> CoreResult<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn delete_by_username(&self, username: &str) -> CoreResult<bool> {
        let mut users = self.users.lock().unwrap();
        let before = users.len();
        users.retain(|u| u.username != username);
        Ok(users.len() < before)
    }
}

/// In-memory reward store
#[derive(Default)]
pub struct MemoryRewardStore {
    rewards: Mutex<Vec<Reward>>,
}

impl MemoryRewardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, reward: Reward) {
        self.rewards.lock().unwrap().push(reward);
    }
}

#[async_trait]
impl RewardStore for MemoryRewardStore {
    async fn history(&self, user_id: &str) -> CoreResult<Vec<Reward>> {
        Ok(self
            .rewards
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_for_user(&self, user_id: &str) -> CoreResult<u64> {
        let mut rewards = self.rewards.lock().unwrap();
        let before = rewards.len();
        rewards.retain(|r| r.user_id != user_id);
        Ok((before - rewards.len()) as u64)
    }
}

/// In-memory payout store
#[derive(Default)]
pub struct MemoryPayoutStore {
    payouts: Mutex<Vec<PayoutRequest>>,
}

impl MemoryPayoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, payout: PayoutRequest) {
        self.payouts.lock().unwrap().push(payout);
    }
}

#[async_trait]
impl PayoutStore for MemoryPayoutStore {
    async fn history(&self, user_id: &str) -> CoreResult<Vec<PayoutRequest>> {
        Ok(self
            .payouts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn mark_paid(&self, id: i64, now: DateTime<Utc>) -> CoreResult<PayoutRequest> {
        let mut payouts = self.payouts.lock().unwrap();
        let payout = payouts
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| CoreError::not_found("PayoutRequest", &id.to_string()))?;
        payout.mark_paid(now)?;
        Ok(payout.clone())
    }
}

/// In-memory package store
#[derive(Default)]
pub struct MemoryPackageStore {
    packages: Mutex<HashMap<String, DataPackage>>,
}

impl MemoryPackageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PackageStore for MemoryPackageStore {
    async fn save(&self, package: &DataPackage) -> CoreResult<()> {
        self.packages
            .lock()
            .unwrap()
            .insert(package.package_id.clone(), package.clone());
        Ok(())
    }

    async fn find(&self, package_id: &str) -> CoreResult<Option<DataPackage>> {
        Ok(self.packages.lock().unwrap().get(package_id).cloned())
    }
}

/// In-memory package audit store
#[derive(Default)]
pub struct MemoryPackageAuditStore {
    records: Mutex<Vec<PackageAuditRecord>>,
}

impl MemoryPackageAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<PackageAuditRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl PackageAuditStore for MemoryPackageAuditStore {
    async fn append(&self, record: PackageAuditRecord) -> CoreResult<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }

    async fn for_package(&self, package_id: &str) -> CoreResult<Vec<PackageAuditRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.package_id == package_id)
            .cloned()
            .collect())
    }
}

/// In-memory preference profiles for the agent protocol handler
#[derive(Default)]
pub struct MemoryPreferenceStore {
    profiles: Mutex<HashMap<String, HashMap<String, Vec<String>>>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the accepted access tiers for one (user, data type) pair
    pub fn set_accepted(&self, user_id: &str, data_type: &str, tiers: Vec<String>) {
        self.profiles
            .lock()
            .unwrap()
            .entry(user_id.to_string())
            .or_default()
            .insert(data_type.to_string(), tiers);
    }
}

#[async_trait]
impl UserPreferenceStore for MemoryPreferenceStore {
    async fn accepted_tiers(
        &self,
        user_id: &str,
        data_type: &str,
    ) -> CoreResult<Option<Vec<String>>> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .get(user_id)
            .and_then(|profile| profile.get(data_type))
            .cloned())
    }

    async fn knows_data_type(&self, user_id: &str, data_type: &str) -> CoreResult<bool> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .get(user_id)
            .map(|profile| profile.contains_key(data_type))
            .unwrap_or(false))
    }
}

/// In-memory A2A exchange log
#[derive(Default)]
pub struct MemoryAgentLogStore {
    exchanges: Mutex<HashMap<String, Vec<serde_json::Value>>>,
}

impl MemoryAgentLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentLogStore for MemoryAgentLogStore {
    async fn append(&self, user_id: &str, exchange: serde_json::Value) -> CoreResult<()> {
        self.exchanges
            .lock()
            .unwrap()
            .entry(user_id.to_string())
            .or_default()
            .push(exchange);
        Ok(())
    }

    async fn for_user(&self, user_id: &str) -> CoreResult<Vec<serde_json::Value>> {
        Ok(self
            .exchanges
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_chain_linkage() {
        let store = MemoryConsentStore::new();
        let first = store
            .append_chained(ConsentEventDraft::new("u1", ConsentAction::OptIn))
            .await
            .unwrap();
        let second = store
            .append_chained(ConsentEventDraft::new("u1", ConsentAction::OptOut))
            .await
            .unwrap();

        assert_eq!(first.prev_hash, GENESIS_HASH);
        assert_eq!(second.prev_hash, first.hash);
    }

    #[tokio::test]
    async fn test_memory_remove_supports_rollback() {
        let store = MemoryConsentStore::new();
        let event = store
            .append_chained(ConsentEventDraft::new("u1", ConsentAction::OptIn))
            .await
            .unwrap();
        assert!(store.remove(event.id).await.unwrap());
        assert!(store.history("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_preference_store_lookup() {
        let prefs = MemoryPreferenceStore::new();
        prefs.set_accepted("u1", "location", vec!["anonymous_short_term".into()]);

        assert!(prefs.knows_data_type("u1", "location").await.unwrap());
        assert!(!prefs.knows_data_type("u1", "health").await.unwrap());
        assert_eq!(
            prefs.accepted_tiers("u1", "location").await.unwrap(),
            Some(vec!["anonymous_short_term".to_string()])
        );
    }
}
