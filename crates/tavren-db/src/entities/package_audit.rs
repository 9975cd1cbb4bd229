//! Package audit entity model for SeaORM
//!
//! Append-only; audit rows outlive the package content they describe.

use super::*;
use tavren_core::entities::package::{AuditOperation, PackageAuditRecord};

use crate::error::DatabaseError;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "data_package_audits")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(indexed)]
    pub timestamp: chrono::DateTime<chrono::Utc>,

    #[sea_orm(indexed)]
    pub operation: String,

    #[sea_orm(indexed)]
    pub package_id: String,

    #[sea_orm(indexed)]
    pub user_id: String,

    #[sea_orm(indexed)]
    pub consent_id: i64,

    #[sea_orm(indexed)]
    pub buyer_id: Option<String>,

    pub data_type: String,

    pub access_level: String,

    pub anonymization_level: String,

    pub record_count: i32,

    pub purpose: String,

    pub status: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    #[sea_orm(column_type = "Json", nullable)]
    pub metadata: Option<Json>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

fn operation_from_str(s: &str) -> Result<AuditOperation, DatabaseError> {
    match s {
        "created" => Ok(AuditOperation::Created),
        "accessed" => Ok(AuditOperation::Accessed),
        "expired" => Ok(AuditOperation::Expired),
        "validation_failed" => Ok(AuditOperation::ValidationFailed),
        "denied" => Ok(AuditOperation::Denied),
        other => Err(DatabaseError::ValidationError(format!(
            "Unknown audit operation: {}",
            other
        ))),
    }
}

impl TryFrom<Model> for PackageAuditRecord {
    type Error = DatabaseError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(PackageAuditRecord {
            timestamp: model.timestamp,
            operation: operation_from_str(&model.operation)?,
            package_id: model.package_id,
            user_id: model.user_id,
            consent_id: model.consent_id,
            buyer_id: model.buyer_id,
            data_type: model.data_type,
            access_level: model.access_level,
            anonymization_level: model.anonymization_level,
            record_count: model.record_count.max(0) as usize,
            purpose: model.purpose,
            status: model.status,
            error_message: model.error_message,
            metadata: model.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_parsing() {
        assert_eq!(
            operation_from_str("created").unwrap(),
            AuditOperation::Created
        );
        assert!(operation_from_str("deleted").is_err());
    }
}
