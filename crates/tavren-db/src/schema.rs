//! Schema bootstrap
//!
//! Creates tables from the entity models if they do not exist. Used by
//! development and test environments; production schema management happens
//! out of band.

use sea_orm::{ConnectionTrait, DatabaseConnection, Schema};
use tracing::info;

use crate::entities;
use crate::error::Result;

/// Create every application table, idempotently
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut statements = vec![
        schema.create_table_from_entity(entities::consent_event::Entity),
        schema.create_table_from_entity(entities::data_package::Entity),
        schema.create_table_from_entity(entities::package_audit::Entity),
        schema.create_table_from_entity(entities::user::Entity),
        schema.create_table_from_entity(entities::reward::Entity),
        schema.create_table_from_entity(entities::payout_request::Entity),
    ];

    for statement in &mut statements {
        statement.if_not_exists();
        db.execute(backend.build(&*statement)).await?;
    }

    info!("Database schema ready");
    Ok(())
}
