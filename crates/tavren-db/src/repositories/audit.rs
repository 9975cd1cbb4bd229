//! Package audit repository

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};

use tavren_core::entities::package::PackageAuditRecord;
use tavren_core::errors::CoreResult;
use tavren_core::store::PackageAuditStore;

use crate::entities::package_audit::{ActiveModel, Column, Entity};
use crate::error::DatabaseError;

pub struct PackageAuditRepository {
    db: Arc<DatabaseConnection>,
}

impl PackageAuditRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PackageAuditStore for PackageAuditRepository {
    async fn append(&self, record: PackageAuditRecord) -> CoreResult<()> {
        let active = ActiveModel {
            id: NotSet,
            timestamp: Set(record.timestamp),
            operation: Set(record.operation.as_str().to_string()),
            package_id: Set(record.package_id),
            user_id: Set(record.user_id),
            consent_id: Set(record.consent_id),
            buyer_id: Set(record.buyer_id),
            data_type: Set(record.data_type),
            access_level: Set(record.access_level),
            anonymization_level: Set(record.anonymization_level),
            record_count: Set(record.record_count as i32),
            purpose: Set(record.purpose),
            status: Set(record.status),
            error_message: Set(record.error_message),
            metadata: Set(record.metadata),
        };

        Entity::insert(active)
            .exec(self.db.as_ref())
            .await
            .map_err(DatabaseError::from)?;
        Ok(())
    }

    async fn for_package(&self, package_id: &str) -> CoreResult<Vec<PackageAuditRecord>> {
        let models = Entity::find()
            .filter(Column::PackageId.eq(package_id))
            .order_by_asc(Column::Timestamp)
            .all(self.db.as_ref())
            .await
            .map_err(DatabaseError::from)?;

        models
            .into_iter()
            .map(|m| m.try_into().map_err(Into::into))
            .collect()
    }
}
