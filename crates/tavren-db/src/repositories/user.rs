//! User repository

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};

use tavren_core::entities::User;
use tavren_core::errors::CoreResult;
use tavren_core::store::UserStore;

use crate::entities::user::{Column, Entity};
use crate::error::DatabaseError;

pub struct UserRepository {
    db: Arc<DatabaseConnection>,
}

impl UserRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for UserRepository {
    async fn find_by_username(&self, username: &str) -> CoreResult<Option<User>> {
        let model = Entity::find()
            .filter(Column::Username.eq(username))
            .one(self.db.as_ref())
            .await
            .map_err(DatabaseError::from)?;
        Ok(model.map(Into::into))
    }

    async fn delete_by_username(&self, username: &str) -> CoreResult<bool> {
        let result = Entity::delete_many()
            .filter(Column::Username.eq(username))
            .exec(self.db.as_ref())
            .await
            .map_err(DatabaseError::from)?;
        Ok(result.rows_affected > 0)
    }
}
