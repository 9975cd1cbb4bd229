//! Data packaging service
//!
//! Produces access-tiered, anonymized data packages with capability tokens
//! and audit records. Consent is verified twice: the named consent event
//! must belong to the user and grant access, and the validator must allow
//! (user, data_type, purpose). A freshness re-check runs before the token
//! is issued so a revocation landing after the authorization read blocks
//! delivery.

pub mod anonymize;
pub mod policy;
pub mod schema;
pub mod token;

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::consent::validator::ConsentValidator;
use crate::crypto::PackageCipher;
use crate::entities::package::{
    anonymization_level, AccessLevel, AnonymizationLevel, AuditOperation, DataPackage,
    PackageAuditRecord, PackageContent, PackageMetadata, TrustTier,
};
use crate::errors::{CoreError, CoreResult};
use crate::store::{ConsentEventStore, PackageAuditStore, PackageStore, UserDataSource};

pub use token::{CapabilityClaims, CapabilityTokenSigner, TokenRejection};

/// Package format version
const PACKAGE_VERSION: &str = "1.1";

/// Parameters for a package request
#[derive(Debug, Clone)]
pub struct PackageRequest {
    pub user_id: String,
    pub data_type: String,
    pub access_level: AccessLevel,
    pub consent_id: i64,
    pub purpose: String,
    pub buyer_id: Option<String>,
    pub trust_tier: TrustTier,
}

/// Outcome of a token validation, shaped for the validate-token endpoint
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TokenValidation {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<TokenRejection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<CapabilityClaims>,
}

/// Service assembling data packages for buyers and agents
pub struct DataPackagingService {
    consents: Arc<dyn ConsentEventStore>,
    validator: Arc<ConsentValidator>,
    data_source: Arc<dyn UserDataSource>,
    packages: Arc<dyn PackageStore>,
    audit: Arc<dyn PackageAuditStore>,
    signer: CapabilityTokenSigner,
    cipher: Option<PackageCipher>,
}

impl DataPackagingService {
    pub fn new(
        consents: Arc<dyn ConsentEventStore>,
        validator: Arc<ConsentValidator>,
        data_source: Arc<dyn UserDataSource>,
        packages: Arc<dyn PackageStore>,
        audit: Arc<dyn PackageAuditStore>,
        token_secret: impl Into<Vec<u8>>,
        cipher: Option<PackageCipher>,
    ) -> Self {
        Self {
            consents,
            validator,
            data_source,
            packages,
            audit,
            signer: CapabilityTokenSigner::new(token_secret),
            cipher,
        }
    }

    /// Retrieve, anonymize, and package data for a request.
    ///
    /// Consent failures yield an error-shaped package with no content and a
    /// denied audit record rather than an `Err`.
    pub async fn package_data(&self, request: PackageRequest) -> CoreResult<DataPackage> {
        info!(
            user_id = %request.user_id,
            data_type = %request.data_type,
            access_level = request.access_level.as_str(),
            buyer_id = ?request.buyer_id,
            "Packaging data"
        );

        let authorized_at = Utc::now();

        if let Some(reason) = self.consent_failure(&request).await? {
            warn!(reason = %reason, "Consent validation failed for package request");
            return self.denied_package(&request, reason).await;
        }

        let raw = self
            .data_source
            .fetch(&request.user_id, &request.data_type)
            .await?;
        if raw.is_empty() {
            warn!(user_id = %request.user_id, data_type = %request.data_type, "No data available");
            return self
                .denied_package(&request, "Data not available".to_string())
                .await;
        }

        let level = anonymization_level(request.access_level, request.trust_tier);
        let anonymized = anonymize::anonymize_records(raw, &request.data_type, level);
        let formatted = schema::format_records(anonymized, &request.data_type)?;

        let expires_at = if request.access_level.is_short_term() {
            authorized_at + Duration::hours(24)
        } else {
            authorized_at + Duration::days(30)
        };

        // Authorization may be stale by one tick; confirm no revocation
        // landed before we issue the token and persist the package.
        if !self
            .validator
            .no_revocation_since(&request.user_id, authorized_at)
            .await?
        {
            warn!(user_id = %request.user_id, "Consent revoked after authorization read");
            return self
                .denied_package(&request, "Consent revoked during packaging".to_string())
                .await;
        }

        let package_id = Uuid::new_v4().to_string();
        let access_token = self
            .signer
            .issue(&package_id, request.consent_id, expires_at);

        let record_count = formatted.len();
        let quality = schema::data_quality_score(&formatted);

        let content = match &self.cipher {
            Some(cipher) => {
                let plaintext = serde_json::to_vec(&formatted)?;
                PackageContent::Encrypted(cipher.encrypt(&plaintext)?)
            }
            None => PackageContent::Records(formatted),
        };

        let package = DataPackage {
            tavren_data_package: PACKAGE_VERSION.to_string(),
            package_id: package_id.clone(),
            consent_id: request.consent_id,
            user_id: request.user_id.clone(),
            created_at: authorized_at,
            data_type: request.data_type.clone(),
            access_level: request.access_level,
            anonymization_level: level,
            purpose: request.purpose.clone(),
            expires_at,
            status: None,
            reason: None,
            access_token: Some(access_token),
            content,
            metadata: PackageMetadata {
                record_count,
                schema_version: schema::SCHEMA_VERSION.to_string(),
                data_quality_score: quality,
                buyer_id: request.buyer_id.clone(),
                trust_tier: request.trust_tier,
                encryption_status: if self.cipher.is_some() {
                    "encrypted".to_string()
                } else {
                    "none".to_string()
                },
                mcp_context: serde_json::json!({
                    "purpose": request.purpose,
                    "usage_policy": policy::usage_policy(request.access_level, request.trust_tier),
                }),
                error_details: None,
            },
        };

        self.packages.save(&package).await?;
        self.append_audit(&package, AuditOperation::Created, "success", None)
            .await;

        info!(package_id = %package.package_id, record_count, "Data package created");
        Ok(package)
    }

    /// Both consent checks; `Some(reason)` when the request must be denied
    async fn consent_failure(&self, request: &PackageRequest) -> CoreResult<Option<String>> {
        let consent = self.consents.find_by_id(request.consent_id).await?;
        let consent = match consent {
            Some(consent) => consent,
            None => return Ok(Some("Consent record not found".to_string())),
        };

        if consent.user_id != request.user_id {
            return Ok(Some("Consent record does not match user".to_string()));
        }
        if !consent.action.grants_consent() {
            return Ok(Some("User declined consent for this data".to_string()));
        }

        let decision = self
            .validator
            .is_processing_allowed(&request.user_id, &request.data_type, &request.purpose)
            .await;
        if !decision.allowed {
            return Ok(Some(
                decision
                    .reason
                    .unwrap_or_else(|| "Permission denied".to_string()),
            ));
        }

        Ok(None)
    }

    /// Error-shaped package with no content, plus a denied audit record
    async fn denied_package(
        &self,
        request: &PackageRequest,
        reason: String,
    ) -> CoreResult<DataPackage> {
        let level = anonymization_level(request.access_level, request.trust_tier);
        let package = DataPackage {
            tavren_data_package: PACKAGE_VERSION.to_string(),
            package_id: Uuid::new_v4().to_string(),
            consent_id: request.consent_id,
            user_id: request.user_id.clone(),
            created_at: Utc::now(),
            data_type: request.data_type.clone(),
            access_level: request.access_level,
            anonymization_level: level,
            purpose: request.purpose.clone(),
            expires_at: Utc::now(),
            status: Some("error".to_string()),
            reason: Some(reason.clone()),
            access_token: None,
            content: PackageContent::Records(Vec::new()),
            metadata: PackageMetadata {
                record_count: 0,
                schema_version: schema::SCHEMA_VERSION.to_string(),
                data_quality_score: 0.0,
                buyer_id: request.buyer_id.clone(),
                trust_tier: request.trust_tier,
                encryption_status: "none".to_string(),
                mcp_context: Value::Null,
                error_details: Some(reason.clone()),
            },
        };

        self.append_audit(&package, AuditOperation::Denied, "error", Some(reason))
            .await;
        Ok(package)
    }

    /// Validate a capability token against a package id
    pub fn validate_token(&self, token: &str, package_id: &str) -> TokenValidation {
        match self.signer.validate(token, package_id, Utc::now()) {
            Ok(claims) => TokenValidation {
                ok: true,
                reason: None,
                claims: Some(claims),
            },
            Err(reason) => TokenValidation {
                ok: false,
                reason: Some(reason),
                claims: None,
            },
        }
    }

    /// Fetch a previously created package, enforcing the capability token
    /// and content expiry. Every outcome is audited.
    pub async fn get_package(
        &self,
        package_id: &str,
        access_token: &str,
    ) -> CoreResult<DataPackage> {
        let package = self
            .packages
            .find(package_id)
            .await?
            .ok_or_else(|| CoreError::not_found("DataPackage", package_id))?;

        match self.signer.validate(access_token, package_id, Utc::now()) {
            Ok(_) => {}
            Err(TokenRejection::Expired) => {
                self.append_audit(
                    &package,
                    AuditOperation::Expired,
                    "error",
                    Some("Capability token expired".to_string()),
                )
                .await;
                return Err(CoreError::auth("Capability token expired"));
            }
            Err(reason) => {
                self.append_audit(
                    &package,
                    AuditOperation::ValidationFailed,
                    "error",
                    Some(format!("Token rejected: {}", reason.as_str())),
                )
                .await;
                return Err(CoreError::auth(format!(
                    "Invalid capability token: {}",
                    reason.as_str()
                )));
            }
        }

        if package.is_expired(Utc::now()) {
            self.append_audit(
                &package,
                AuditOperation::Expired,
                "error",
                Some("Package content expired".to_string()),
            )
            .await;
            return Err(CoreError::not_found("DataPackage", package_id));
        }

        self.append_audit(&package, AuditOperation::Accessed, "success", None)
            .await;
        Ok(package)
    }

    /// Decrypt the content of an encrypted package
    pub fn decrypt_content(&self, package: &DataPackage) -> CoreResult<Vec<Value>> {
        match &package.content {
            PackageContent::Records(records) => Ok(records.clone()),
            PackageContent::Encrypted(blob) => {
                let cipher = self.cipher.as_ref().ok_or_else(|| {
                    CoreError::integrity("Package is encrypted but no cipher is configured")
                })?;
                let plaintext = cipher.decrypt(blob)?;
                Ok(serde_json::from_slice(&plaintext)
                    .map_err(|e| CoreError::integrity(format!("Decrypted content corrupt: {}", e)))?)
            }
        }
    }

    /// Audit writes are background-path appends: failures are logged and
    /// retried out of band, never propagated into the user-facing result
    async fn append_audit(
        &self,
        package: &DataPackage,
        operation: AuditOperation,
        status: &str,
        error_message: Option<String>,
    ) {
        let record = PackageAuditRecord {
            timestamp: Utc::now(),
            operation,
            package_id: package.package_id.clone(),
            user_id: package.user_id.clone(),
            consent_id: package.consent_id,
            buyer_id: package.metadata.buyer_id.clone(),
            data_type: package.data_type.clone(),
            access_level: package.access_level.as_str().to_string(),
            anonymization_level: package.anonymization_level.as_str().to_string(),
            record_count: package.metadata.record_count,
            purpose: package.purpose.clone(),
            status: status.to_string(),
            error_message,
            metadata: None,
        };

        if let Err(e) = self.audit.append(record).await {
            warn!(package_id = %package.package_id, error = %e, "Package audit append failed");
        }
    }
}
