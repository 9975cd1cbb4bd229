//! Data packaging handlers

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::info;

use tavren_core::entities::package::{AccessLevel, TrustTier};
use tavren_core::packaging::PackageRequest;

use crate::middleware::{ApiError, ApiResult, AuthContext};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreatePackageRequest {
    pub user_id: String,
    pub data_type: String,
    pub access_level: String,
    pub consent_id: i64,
    pub purpose: String,
    pub buyer_id: Option<String>,
    pub trust_tier: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FetchPackageQuery {
    pub access_token: String,
}

#[derive(Debug, Deserialize)]
pub struct ValidateTokenRequest {
    pub access_token: String,
    pub package_id: String,
}

/// Create a data package for a buyer or agent request
pub async fn create_package(
    _auth: AuthContext,
    body: web::Json<CreatePackageRequest>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let access_level = AccessLevel::from_str(&body.access_level).map_err(ApiError::from)?;
    let trust_tier = match body.trust_tier.as_deref() {
        Some(tier) => TrustTier::from_str(tier).map_err(ApiError::from)?,
        None => TrustTier::Standard,
    };

    info!(
        user_id = %body.user_id,
        data_type = %body.data_type,
        access_level = %body.access_level,
        "Package requested"
    );

    let package = state
        .packaging
        .package_data(PackageRequest {
            user_id: body.user_id.clone(),
            data_type: body.data_type.clone(),
            access_level,
            consent_id: body.consent_id,
            purpose: body.purpose.clone(),
            buyer_id: body.buyer_id.clone(),
            trust_tier,
        })
        .await?;

    Ok(HttpResponse::Created().json(package))
}

/// Fetch a package by id, authorized by its capability token
pub async fn fetch_package(
    package_id: web::Path<String>,
    query: web::Query<FetchPackageQuery>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let package = state
        .packaging
        .get_package(&package_id.into_inner(), &query.access_token)
        .await?;
    Ok(HttpResponse::Ok().json(package))
}

/// Validate a capability token against a package id
pub async fn validate_token(
    _auth: AuthContext,
    body: web::Json<ValidateTokenRequest>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let validation = state
        .packaging
        .validate_token(&body.access_token, &body.package_id);
    Ok(HttpResponse::Ok().json(validation))
}
