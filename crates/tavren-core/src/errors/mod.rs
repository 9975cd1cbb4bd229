//! Error types and error handling utilities
//!
//! This module defines the core error types used throughout the Tavren
//! backend. Every component maps its leaf errors onto this taxonomy at its
//! public boundary; the API layer renders the taxonomy as a uniform
//! error envelope.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Core result type used throughout the application
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error types for the consent and privacy services
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "details", rename_all = "snake_case")]
pub enum CoreError {
    /// Malformed input, missing fields, invalid privacy parameters
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or invalid credentials or capability token
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Consent denied, DSR restriction active, or insufficient trust tier
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Unknown package, user, or consent id
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    /// Quota exhausted for the caller's key
    #[error("Rate limit exceeded: {message}")]
    RateLimited { message: String, retry_after: u64 },

    /// Status-transition violation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Ledger verification mismatch or package decrypt failure
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Downstream store or cache unreachable
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// One of the ledger's two sinks failed before the other could be
    /// rolled back
    #[error("Ledger write failed: {0}")]
    LedgerWrite(String),

    /// Uncategorized; logged with full context, never leaked to clients
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        CoreError::Validation(message.into())
    }

    /// Create an authentication error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        CoreError::Auth(message.into())
    }

    /// Create a forbidden error
    pub fn forbidden<S: Into<String>>(message: S) -> Self {
        CoreError::Forbidden(message.into())
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(entity: S, id: S) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Create a rate limited error carrying the seconds until reset
    pub fn rate_limited<S: Into<String>>(message: S, retry_after: u64) -> Self {
        CoreError::RateLimited {
            message: message.into(),
            retry_after,
        }
    }

    /// Create a conflict error
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        CoreError::Conflict(message.into())
    }

    /// Create an integrity error
    pub fn integrity<S: Into<String>>(message: S) -> Self {
        CoreError::Integrity(message.into())
    }

    /// Create a dependency error
    pub fn dependency<S: Into<String>>(message: S) -> Self {
        CoreError::Dependency(message.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        CoreError::Internal(message.into())
    }

    /// Get the error code surfaced in API error envelopes
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::Validation(_) => ErrorCode::ValidationError,
            CoreError::Auth(_) => ErrorCode::AuthError,
            CoreError::Forbidden(_) => ErrorCode::Forbidden,
            CoreError::NotFound { .. } => ErrorCode::NotFound,
            CoreError::RateLimited { .. } => ErrorCode::RateLimited,
            CoreError::Conflict(_) => ErrorCode::Conflict,
            CoreError::Integrity(_) => ErrorCode::IntegrityError,
            CoreError::Dependency(_) => ErrorCode::DependencyError,
            CoreError::LedgerWrite(_) => ErrorCode::DependencyError,
            CoreError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if the error is retryable with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Dependency(_) | CoreError::RateLimited { .. }
        )
    }

    /// Check if the error should be logged at error level
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            CoreError::Internal(_) | CoreError::Integrity(_) | CoreError::LedgerWrite(_)
        )
    }
}

/// Error codes matching the API error envelope contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    AuthError,
    Forbidden,
    NotFound,
    RateLimited,
    Conflict,
    IntegrityError,
    DependencyError,
    InternalError,
}

impl ErrorCode {
    /// String form used in error envelopes
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::AuthError => "AUTH_ERROR",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::IntegrityError => "INTEGRITY_ERROR",
            ErrorCode::DependencyError => "DEPENDENCY_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Convert from validator::ValidationErrors
impl From<validator::ValidationErrors> for CoreError {
    fn from(err: validator::ValidationErrors) -> Self {
        CoreError::Validation(err.to_string())
    }
}

/// Convert from serde_json::Error
impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Validation(format!("Serialization error: {}", err))
    }
}

/// Convert from anyhow::Error for internal errors
impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Internal(err.to_string())
    }
}
