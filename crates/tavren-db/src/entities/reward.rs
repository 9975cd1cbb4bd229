//! Reward entity model for SeaORM

use super::*;
use tavren_core::entities::Reward;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rewards")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(indexed)]
    pub user_id: String,

    #[sea_orm(indexed)]
    pub offer_id: String,

    pub amount: f64,

    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Reward {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            offer_id: model.offer_id,
            amount: model.amount,
            timestamp: model.timestamp,
        }
    }
}
