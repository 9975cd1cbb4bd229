//! Database error types and utilities

use thiserror::Error;

/// Database operation result type
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Database-specific error types
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal database error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for DatabaseError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err {
            sea_orm::DbErr::ConnectionAcquire(_) => {
                DatabaseError::ConnectionError("Failed to acquire database connection".to_string())
            }
            sea_orm::DbErr::RecordNotFound(msg) => DatabaseError::NotFound(msg),
            sea_orm::DbErr::Query(query_err) => DatabaseError::QueryError(query_err.to_string()),
            sea_orm::DbErr::Exec(exec_err) => DatabaseError::QueryError(exec_err.to_string()),
            sea_orm::DbErr::Conn(conn_err) => {
                DatabaseError::ConnectionError(conn_err.to_string())
            }
            _ => DatabaseError::Internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        DatabaseError::SerializationError(err.to_string())
    }
}

/// Map database failures onto the core taxonomy: connection problems are
/// dependency errors (retryable), everything else surfaces as internal
impl From<DatabaseError> for tavren_core::CoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::ConnectionError(msg) | DatabaseError::TransactionError(msg) => {
                tavren_core::CoreError::dependency(msg)
            }
            DatabaseError::NotFound(msg) => tavren_core::CoreError::NotFound {
                entity: "record".to_string(),
                id: msg,
            },
            DatabaseError::ValidationError(msg) => tavren_core::CoreError::validation(msg),
            DatabaseError::QueryError(msg)
            | DatabaseError::SerializationError(msg)
            | DatabaseError::Internal(msg) => tavren_core::CoreError::internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_errors_become_retryable_dependency_errors() {
        let core: tavren_core::CoreError =
            DatabaseError::ConnectionError("pool exhausted".to_string()).into();
        assert!(core.is_retryable());
    }

    #[test]
    fn test_query_errors_are_internal() {
        let core: tavren_core::CoreError =
            DatabaseError::QueryError("syntax".to_string()).into();
        assert!(!core.is_retryable());
    }
}
