//! Consent event repository
//!
//! Implements the chained append with a storage-level exclusive section:
//! on Postgres a transaction-scoped advisory lock keyed by the user id
//! serializes (read latest -> compute hash -> insert) per user while
//! appends for different users proceed in parallel. A process-local mutex
//! would not survive multi-process deployment, so none is used. SQLite
//! serializes writers on its own.

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait,
    QueryFilter, QueryOrder, Statement, TransactionTrait,
};
use sha2::{Digest, Sha256};

use tavren_core::consent::ledger::{chain_hash, timestamp_iso, GENESIS_HASH};
use tavren_core::entities::consent::{ConsentAction, ConsentEvent, ConsentEventDraft};
use tavren_core::errors::CoreResult;
use tavren_core::store::ConsentEventStore;

use crate::entities::consent_event::{ActiveModel, Column, Entity, Model};
use crate::error::DatabaseError;

/// Advisory lock key for a user's ledger chain: the first eight bytes of
/// the SHA-256 of the user id, as a signed 64-bit integer
pub fn user_lock_key(user_id: &str) -> i64 {
    let digest = Sha256::digest(user_id.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

pub struct ConsentEventRepository {
    db: Arc<DatabaseConnection>,
}

impl ConsentEventRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn acquire_user_lock<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: &str,
    ) -> Result<(), DatabaseError> {
        if self.db.get_database_backend() == DbBackend::Postgres {
            conn.execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                "SELECT pg_advisory_xact_lock($1)",
                [user_lock_key(user_id).into()],
            ))
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ConsentEventStore for ConsentEventRepository {
    async fn append_chained(&self, draft: ConsentEventDraft) -> CoreResult<ConsentEvent> {
        let result: Result<ConsentEvent, DatabaseError> = async {
            let txn = self.db.begin().await.map_err(DatabaseError::from)?;

            self.acquire_user_lock(&txn, &draft.user_id).await?;

            let prev_hash = Entity::find()
                .filter(Column::UserId.eq(draft.user_id.as_str()))
                .order_by_desc(Column::Timestamp)
                .order_by_desc(Column::Id)
                .one(&txn)
                .await
                .map_err(DatabaseError::from)?
                .map(|m| m.hash)
                .unwrap_or_else(|| GENESIS_HASH.to_string());

            let timestamp = chrono::Utc::now();
            let inserted: Model = ActiveModel {
                id: NotSet,
                user_id: Set(draft.user_id.clone()),
                offer_id: Set(draft.offer_id.clone()),
                action: Set(draft.action.as_str().to_string()),
                scope: Set(draft.scope.clone()),
                purpose: Set(draft.purpose.clone()),
                initiated_by: Set(draft.initiated_by.as_str().to_string()),
                timestamp: Set(timestamp),
                reason: Set(draft.reason.clone()),
                reason_category: Set(draft.reason_category.clone()),
                metadata: Set(draft.metadata.clone()),
                prev_hash: Set(prev_hash.clone()),
                hash: Set(String::new()),
            }
            .insert(&txn)
            .await
            .map_err(DatabaseError::from)?;

            let hash = chain_hash(
                inserted.id,
                &inserted.user_id,
                &inserted.action,
                &timestamp_iso(inserted.timestamp),
                &prev_hash,
            );

            let mut update: ActiveModel = inserted.into();
            update.hash = Set(hash);
            let finished = update.update(&txn).await.map_err(DatabaseError::from)?;

            txn.commit().await.map_err(DatabaseError::from)?;
            Ok(finished.try_into()?)
        }
        .await;

        result.map_err(Into::into)
    }

    async fn history(&self, user_id: &str) -> CoreResult<Vec<ConsentEvent>> {
        let models = Entity::find()
            .filter(Column::UserId.eq(user_id))
            .order_by_asc(Column::Timestamp)
            .order_by_asc(Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(DatabaseError::from)?;

        models
            .into_iter()
            .map(|m| m.try_into().map_err(Into::into))
            .collect()
    }

    async fn find_by_id(&self, id: i64) -> CoreResult<Option<ConsentEvent>> {
        let model = Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(DatabaseError::from)?;
        model
            .map(|m| m.try_into().map_err(Into::into))
            .transpose()
    }

    async fn declined_events(&self) -> CoreResult<Vec<ConsentEvent>> {
        let models = Entity::find()
            .filter(Column::Action.eq(ConsentAction::Declined.as_str()))
            .order_by_asc(Column::Timestamp)
            .all(self.db.as_ref())
            .await
            .map_err(DatabaseError::from)?;

        models
            .into_iter()
            .map(|m| m.try_into().map_err(Into::into))
            .collect()
    }

    async fn delete_user_events(&self, user_id: &str) -> CoreResult<u64> {
        let result: Result<u64, DatabaseError> = async {
            // Same lock as append, so deletes drain in-flight chained
            // writes for the user first
            let txn = self.db.begin().await.map_err(DatabaseError::from)?;
            self.acquire_user_lock(&txn, user_id).await?;

            let deleted = Entity::delete_many()
                .filter(Column::UserId.eq(user_id))
                .exec(&txn)
                .await
                .map_err(DatabaseError::from)?;

            txn.commit().await.map_err(DatabaseError::from)?;
            Ok(deleted.rows_affected)
        }
        .await;

        result.map_err(Into::into)
    }

    async fn remove(&self, id: i64) -> CoreResult<bool> {
        let result = Entity::delete_by_id(id)
            .exec(self.db.as_ref())
            .await
            .map_err(DatabaseError::from)?;
        Ok(result.rows_affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_key_is_stable_per_user() {
        assert_eq!(user_lock_key("u1"), user_lock_key("u1"));
        assert_ne!(user_lock_key("u1"), user_lock_key("u2"));
    }
}
