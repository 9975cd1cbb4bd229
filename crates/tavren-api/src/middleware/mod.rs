//! HTTP middleware: request ids, auth, rate limiting, error envelopes

pub mod auth;
pub mod error_handler;
pub mod rate_limit;
pub mod request_id;

use actix_cors::Cors;

pub use auth::AuthContext;
pub use error_handler::{ApiError, ApiResult};
pub use rate_limit::RateLimit;
pub use request_id::RequestId;

/// CORS configuration for browser-facing deployments
pub fn setup_cors() -> Cors {
    Cors::default()
        .allowed_origin_fn(|origin, _| {
            origin
                .to_str()
                .map(|o| o.starts_with("http://localhost"))
                .unwrap_or(false)
        })
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            "Content-Type",
            "Authorization",
            "X-Api-Key",
            "X-Requested-With",
        ])
        .expose_headers(vec![
            "X-Request-Id",
            "X-RateLimit-Remaining",
            "X-RateLimit-Reset",
        ])
        .max_age(3600)
}
