//! Reward and payout repositories

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};

use tavren_core::entities::{PayoutRequest, Reward};
use tavren_core::errors::{CoreError, CoreResult};
use tavren_core::store::{PayoutStore, RewardStore};

use crate::entities::{payout_request, reward};
use crate::error::DatabaseError;

pub struct RewardRepository {
    db: Arc<DatabaseConnection>,
}

impl RewardRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RewardStore for RewardRepository {
    async fn history(&self, user_id: &str) -> CoreResult<Vec<Reward>> {
        let models = reward::Entity::find()
            .filter(reward::Column::UserId.eq(user_id))
            .order_by_asc(reward::Column::Timestamp)
            .all(self.db.as_ref())
            .await
            .map_err(DatabaseError::from)?;
        Ok(models.into_iter().map(Into::into).collect())
    }

    async fn delete_for_user(&self, user_id: &str) -> CoreResult<u64> {
        let result = reward::Entity::delete_many()
            .filter(reward::Column::UserId.eq(user_id))
            .exec(self.db.as_ref())
            .await
            .map_err(DatabaseError::from)?;
        Ok(result.rows_affected)
    }
}

pub struct PayoutRepository {
    db: Arc<DatabaseConnection>,
}

impl PayoutRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PayoutStore for PayoutRepository {
    async fn history(&self, user_id: &str) -> CoreResult<Vec<PayoutRequest>> {
        let models = payout_request::Entity::find()
            .filter(payout_request::Column::UserId.eq(user_id))
            .order_by_asc(payout_request::Column::Timestamp)
            .all(self.db.as_ref())
            .await
            .map_err(DatabaseError::from)?;

        models
            .into_iter()
            .map(|m| m.try_into().map_err(Into::into))
            .collect()
    }

    async fn mark_paid(&self, id: i64, now: DateTime<Utc>) -> CoreResult<PayoutRequest> {
        let model = payout_request::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(DatabaseError::from)?
            .ok_or_else(|| CoreError::not_found("PayoutRequest", &id.to_string()))?;

        // The domain transition rule enforces the pending-only constraint
        let mut payout: PayoutRequest = model.clone().try_into().map_err(CoreError::from)?;
        payout.mark_paid(now)?;

        let mut active: payout_request::ActiveModel = model.into();
        active.status = Set(payout.status.as_str().to_string());
        active.paid_at = Set(payout.paid_at);
        active
            .update(self.db.as_ref())
            .await
            .map_err(DatabaseError::from)?;

        Ok(payout)
    }
}
