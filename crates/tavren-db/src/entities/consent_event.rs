//! Consent event entity model for SeaORM
//!
//! The table caches the hash-chained events for query convenience; the
//! JSON-lines journal owned by the ledger service is the durable witness.

use super::*;
use tavren_core::entities::consent as domain;

use crate::error::DatabaseError;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "consent_events")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(indexed)]
    pub user_id: String,

    #[sea_orm(indexed)]
    pub offer_id: Option<String>,

    pub action: String,

    pub scope: Option<String>,

    pub purpose: Option<String>,

    pub initiated_by: String,

    pub timestamp: chrono::DateTime<chrono::Utc>,

    #[sea_orm(column_type = "Text", nullable)]
    pub reason: Option<String>,

    pub reason_category: Option<String>,

    #[sea_orm(column_type = "Json", nullable)]
    pub metadata: Option<Json>,

    pub prev_hash: String,

    pub hash: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for domain::ConsentEvent {
    type Error = DatabaseError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let action = domain::ConsentAction::from_str(&model.action).ok_or_else(|| {
            DatabaseError::ValidationError(format!("Unknown consent action: {}", model.action))
        })?;
        let initiated_by =
            domain::InitiatedBy::from_str(&model.initiated_by).ok_or_else(|| {
                DatabaseError::ValidationError(format!(
                    "Unknown initiator: {}",
                    model.initiated_by
                ))
            })?;

        Ok(domain::ConsentEvent {
            id: model.id,
            user_id: model.user_id,
            offer_id: model.offer_id,
            action,
            scope: model.scope,
            purpose: model.purpose,
            initiated_by,
            timestamp: model.timestamp,
            reason: model.reason,
            reason_category: model.reason_category,
            metadata: model.metadata,
            prev_hash: model.prev_hash,
            hash: model.hash,
        })
    }
}
