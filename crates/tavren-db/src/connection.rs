//! Database connection setup

use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tracing::info;

use crate::error::{DatabaseError, Result};

/// Establish a connection pool. SQLite works for development; production
/// expects a server RDBMS with row-level locking.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(database_url.to_string());
    options
        .max_connections(max_connections)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(false);

    let connection = Database::connect(options)
        .await
        .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

    info!("Database connection established");
    Ok(connection)
}
