//! Agent (A2A) protocol handlers

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::info;

use tavren_core::entities::package::{AccessLevel, TrustTier};
use tavren_core::packaging::PackageRequest;
use tavren_core::store::AgentLogStore;

use crate::middleware::{ApiError, ApiResult, AuthContext};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PayloadQuery {
    pub data_type: Option<String>,
    pub access_level: Option<String>,
}

/// Process an inbound A2A message
pub async fn process_message(
    _auth: AuthContext,
    body: web::Json<serde_json::Value>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let response = state.agent.process_message(body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// A2A exchange history for a user
pub async fn agent_logs(
    auth: AuthContext,
    user_id: web::Path<String>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let user_id = user_id.into_inner();
    if !auth.can_access_user(&user_id) {
        return Err(ApiError::forbidden("Cannot read another user's agent logs"));
    }

    let logs = state.agent_log.for_user(&user_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "user_id": user_id,
        "total_messages": logs.len(),
        "logs": logs,
    })))
}

/// Serve the data payload behind a capability URL issued to an agent.
///
/// The consent id in the path must reference the acceptance event the
/// agent flow recorded; packaging re-verifies it.
pub async fn data_payload(
    _auth: AuthContext,
    consent_id: web::Path<i64>,
    query: web::Query<PayloadQuery>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let consent_id = consent_id.into_inner();

    let consent = state
        .ledger
        .find_event(consent_id)
        .await?
        .ok_or_else(|| ApiError::not_found("ConsentEvent", &consent_id.to_string()))?;

    let data_type = query
        .data_type
        .clone()
        .or_else(|| consent.scope.clone())
        .ok_or_else(|| ApiError::validation("data_type is required"))?;
    let access_level = match query.access_level.as_deref() {
        Some(level) => AccessLevel::from_str(level).map_err(ApiError::from)?,
        None => AccessLevel::AnonymousShortTerm,
    };

    info!(consent_id, data_type = %data_type, "Agent payload requested");

    let package = state
        .packaging
        .package_data(PackageRequest {
            user_id: consent.user_id.clone(),
            data_type,
            access_level,
            consent_id,
            purpose: consent
                .purpose
                .clone()
                .unwrap_or_else(|| "unspecified".to_string()),
            buyer_id: None,
            trust_tier: TrustTier::Standard,
        })
        .await?;

    Ok(HttpResponse::Ok().json(package))
}
