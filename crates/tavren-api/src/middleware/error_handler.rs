//! Uniform error envelopes
//!
//! Every failing endpoint returns `{error, message, error_code,
//! status_code, request_id, timestamp}`. Rate-limit denials additionally
//! carry `Retry-After`. Internal details are logged, never leaked.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use tracing::error;

use tavren_core::{CoreError, ErrorCode};

/// Error envelope returned to clients
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub error_code: String,
    pub status_code: u16,
    pub request_id: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Application error carrying the core taxonomy plus request context
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct ApiError {
    #[source]
    source: CoreError,
    request_id: Option<String>,
}

impl ApiError {
    pub fn new(source: CoreError) -> Self {
        Self {
            source,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(CoreError::validation(message))
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(CoreError::auth(message))
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(CoreError::forbidden(message))
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(CoreError::not_found(entity.into(), id.into()))
    }

    pub fn code(&self) -> ErrorCode {
        self.source.code()
    }
}

impl From<CoreError> for ApiError {
    fn from(source: CoreError) -> Self {
        Self::new(source)
    }
}

impl From<tavren_db::DatabaseError> for ApiError {
    fn from(err: tavren_db::DatabaseError) -> Self {
        Self::new(err.into())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self.source.code() {
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::AuthError => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::IntegrityError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::DependencyError => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let code = self.source.code();

        // Internal errors keep their details out of the response
        let message = match code {
            ErrorCode::InternalError | ErrorCode::IntegrityError => {
                error!(error = %self.source, "Internal error");
                "An unexpected error occurred".to_string()
            }
            _ => self.source.to_string(),
        };

        let body = ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
            message,
            error_code: code.as_str().to_string(),
            status_code: status.as_u16(),
            request_id: self.request_id.clone(),
            timestamp: chrono::Utc::now(),
        };

        let mut builder = HttpResponse::build(status);
        if let CoreError::RateLimited { retry_after, .. } = &self.source {
            builder.insert_header(("Retry-After", retry_after.to_string()));
        }
        builder.json(body)
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(
            ApiError::validation("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::auth("no").status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::forbidden("denied").status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::not_found("Package", "p1").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::new(CoreError::rate_limited("quota", 30)).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::new(CoreError::conflict("paid")).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::new(CoreError::dependency("redis")).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let err = ApiError::new(CoreError::rate_limited("quota exhausted", 42));
        let response = err.error_response();
        assert_eq!(
            response.headers().get("Retry-After").unwrap(),
            "42"
        );
    }

    #[test]
    fn test_internal_error_is_not_leaked() {
        let err = ApiError::new(CoreError::internal("secret detail"));
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // Body is built from ErrorResponse with a generic message; the
        // detail only reaches the log
    }
}
