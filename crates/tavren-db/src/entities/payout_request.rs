//! Payout request entity model for SeaORM

use super::*;
use tavren_core::entities::{PayoutRequest, PayoutStatus};

use crate::error::DatabaseError;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payout_requests")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(indexed)]
    pub user_id: String,

    pub amount: f64,

    #[sea_orm(indexed)]
    pub status: String,

    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub paid_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for PayoutRequest {
    type Error = DatabaseError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let status = PayoutStatus::from_str(&model.status).ok_or_else(|| {
            DatabaseError::ValidationError(format!("Unknown payout status: {}", model.status))
        })?;
        Ok(PayoutRequest {
            id: model.id,
            user_id: model.user_id,
            amount: model.amount,
            status,
            timestamp: model.timestamp,
            paid_at: model.paid_at,
        })
    }
}
