//! Capability tokens for data package access
//!
//! A capability token authorizes exactly one package fetch and is distinct
//! from the session token that authenticates a human: different purpose,
//! different signing key. The format is three base64url segments,
//! `header.payload.signature`, with an HMAC-SHA256 signature over
//! `header "." payload` using the server secret. Tokens are never
//! refreshable; expiry tracks the package.

use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{hmac_sign_url, hmac_verify_url};

/// Claims carried by a capability token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityClaims {
    pub package_id: String,
    pub consent_id: i64,
    pub iat: i64,
    pub exp: i64,
}

/// Why a token failed validation. The reason enum is the only detail
/// callers may surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenRejection {
    InvalidFormat,
    Expired,
    PackageMismatch,
    SignatureInvalid,
}

impl TokenRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenRejection::InvalidFormat => "invalid_format",
            TokenRejection::Expired => "expired",
            TokenRejection::PackageMismatch => "package_mismatch",
            TokenRejection::SignatureInvalid => "signature_invalid",
        }
    }
}

#[derive(Serialize, Deserialize)]
struct TokenHeader {
    alg: String,
    typ: String,
}

/// Issues and validates capability tokens with a dedicated server secret
pub struct CapabilityTokenSigner {
    secret: Vec<u8>,
}

impl CapabilityTokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Issue a token bound to one package, expiring with it
    pub fn issue(
        &self,
        package_id: &str,
        consent_id: i64,
        expires_at: DateTime<Utc>,
    ) -> String {
        let header = TokenHeader {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        };
        let claims = CapabilityClaims {
            package_id: package_id.to_string(),
            consent_id,
            iat: Utc::now().timestamp(),
            exp: expires_at.timestamp(),
        };

        let header_b64 =
            BASE64_URL.encode(serde_json::to_vec(&header).expect("header serializes"));
        let payload_b64 =
            BASE64_URL.encode(serde_json::to_vec(&claims).expect("claims serialize"));
        let signing_input = format!("{}.{}", header_b64, payload_b64);
        let signature = hmac_sign_url(&self.secret, signing_input.as_bytes());

        format!("{}.{}", signing_input, signature)
    }

    /// Validate a token against the package the caller is fetching.
    ///
    /// Checks format, signature, expiry, and package binding; all failure
    /// modes collapse to a `TokenRejection` reason.
    pub fn validate(
        &self,
        token: &str,
        package_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CapabilityClaims, TokenRejection> {
        let mut parts = token.split('.');
        let (header_b64, payload_b64, signature) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(p), Some(s), None) if !h.is_empty() && !p.is_empty() => (h, p, s),
                _ => return Err(TokenRejection::InvalidFormat),
            };

        let header_raw = BASE64_URL
            .decode(header_b64)
            .map_err(|_| TokenRejection::InvalidFormat)?;
        let _header: TokenHeader =
            serde_json::from_slice(&header_raw).map_err(|_| TokenRejection::InvalidFormat)?;

        let payload_raw = BASE64_URL
            .decode(payload_b64)
            .map_err(|_| TokenRejection::InvalidFormat)?;
        let claims: CapabilityClaims =
            serde_json::from_slice(&payload_raw).map_err(|_| TokenRejection::InvalidFormat)?;

        let signing_input = format!("{}.{}", header_b64, payload_b64);
        if !hmac_verify_url(&self.secret, signing_input.as_bytes(), signature) {
            return Err(TokenRejection::SignatureInvalid);
        }

        if claims.exp <= now.timestamp() {
            return Err(TokenRejection::Expired);
        }

        if claims.package_id != package_id {
            return Err(TokenRejection::PackageMismatch);
        }

        Ok(claims)
    }
}
