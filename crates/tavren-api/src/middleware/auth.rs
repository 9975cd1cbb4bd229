//! Request authentication
//!
//! Session issuance lives in the external auth service; this middleware
//! only validates bearer JWTs and the admin API key. The session token
//! authenticates the human and is signed with `JWT_SECRET_KEY`, never
//! with the capability-token secret.

use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use futures_util::future::{ready, Ready};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::middleware::error_handler::ApiError;
use crate::state::AppState;

/// Claims carried by session tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub is_admin: bool,
}

/// Authenticated caller context, extracted per request
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub is_admin: bool,
}

impl AuthContext {
    /// Whether this caller may act on the given user's data
    pub fn can_access_user(&self, user_id: &str) -> bool {
        self.is_admin || self.user_id == user_id
    }
}

fn authenticate(req: &HttpRequest) -> Result<AuthContext, ApiError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| ApiError::auth("Application state unavailable"))?;

    // Admin API key short-circuits JWT validation
    if let Some(key) = req.headers().get("X-Api-Key").and_then(|v| v.to_str().ok()) {
        if !state.config.secrets.admin_api_key.is_empty()
            && key == state.config.secrets.admin_api_key
        {
            return Ok(AuthContext {
                user_id: "admin".to_string(),
                is_admin: true,
            });
        }
        return Err(ApiError::auth("Invalid API key"));
    }

    let header = req
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::auth("Missing Authorization header"))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::auth("Authorization header must use the Bearer scheme"))?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(state.config.secrets.jwt_secret_key.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => ApiError::auth("Token has expired"),
        _ => ApiError::auth("Invalid token"),
    })?;

    Ok(AuthContext {
        user_id: data.claims.sub,
        is_admin: data.claims.is_admin,
    })
}

impl FromRequest for AuthContext {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}

/// Issue a session token; used by tests and development tooling, the real
/// login flow lives in the external auth service
pub fn issue_session_token(
    secret: &str,
    user_id: &str,
    is_admin: bool,
    ttl_minutes: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = chrono::Utc::now();
    let claims = SessionClaims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: (now + chrono::Duration::minutes(ttl_minutes)).timestamp(),
        is_admin,
    };
    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_round_trip() {
        let token = issue_session_token("secret", "u1", false, 30).unwrap();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        let data = decode::<SessionClaims>(
            &token,
            &DecodingKey::from_secret(b"secret"),
            &validation,
        )
        .unwrap();
        assert_eq!(data.claims.sub, "u1");
        assert!(!data.claims.is_admin);
    }

    #[test]
    fn test_access_control() {
        let user = AuthContext {
            user_id: "u1".into(),
            is_admin: false,
        };
        assert!(user.can_access_user("u1"));
        assert!(!user.can_access_user("u2"));

        let admin = AuthContext {
            user_id: "admin".into(),
            is_admin: true,
        };
        assert!(admin.can_access_user("u2"));
    }
}
