//! Data package repository

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::ActiveValue::Set;
use sea_orm::{DatabaseConnection, EntityTrait};

use tavren_core::entities::package::DataPackage;
use tavren_core::errors::CoreResult;
use tavren_core::store::PackageStore;

use crate::entities::data_package::{ActiveModel, Entity, Model};
use crate::error::DatabaseError;

pub struct PackageRepository {
    db: Arc<DatabaseConnection>,
}

impl PackageRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PackageStore for PackageRepository {
    async fn save(&self, package: &DataPackage) -> CoreResult<()> {
        let model = Model::from_domain(package)?;
        let active = ActiveModel {
            package_id: Set(model.package_id),
            user_id: Set(model.user_id),
            consent_id: Set(model.consent_id),
            data_type: Set(model.data_type),
            created_at: Set(model.created_at),
            expires_at: Set(model.expires_at),
            payload: Set(model.payload),
        };
        Entity::insert(active)
            .exec(self.db.as_ref())
            .await
            .map_err(DatabaseError::from)?;
        Ok(())
    }

    async fn find(&self, package_id: &str) -> CoreResult<Option<DataPackage>> {
        let model = Entity::find_by_id(package_id.to_string())
            .one(self.db.as_ref())
            .await
            .map_err(DatabaseError::from)?;
        model
            .map(|m| m.into_domain().map_err(Into::into))
            .transpose()
    }
}
