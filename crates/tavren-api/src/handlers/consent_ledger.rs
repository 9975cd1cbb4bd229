//! Consent ledger handlers

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use tavren_core::entities::consent::{ConsentAction, ConsentEventDraft, InitiatedBy};

use crate::middleware::{ApiError, ApiResult, AuthContext};
use crate::state::AppState;

/// Request to record a consent event
#[derive(Debug, Deserialize)]
pub struct RecordEventRequest {
    pub user_id: String,
    pub action: String,
    pub scope: Option<String>,
    pub purpose: Option<String>,
    pub offer_id: Option<String>,
    pub initiated_by: Option<String>,
    pub reason: Option<String>,
    pub reason_category: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ExportRangeQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    pub user_id: Option<String>,
}

/// Record a consent event in the ledger
pub async fn record_event(
    auth: AuthContext,
    body: web::Json<RecordEventRequest>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    if !auth.can_access_user(&body.user_id) {
        return Err(ApiError::forbidden(
            "Cannot record consent events for another user",
        ));
    }

    let action = ConsentAction::from_str(&body.action)
        .ok_or_else(|| ApiError::validation(format!("Invalid action: {}", body.action)))?;
    let initiated_by = match body.initiated_by.as_deref() {
        Some(value) => InitiatedBy::from_str(value)
            .ok_or_else(|| ApiError::validation(format!("Invalid initiator: {}", value)))?,
        None => InitiatedBy::User,
    };

    info!(user_id = %body.user_id, action = %body.action, "Recording consent event");

    let draft = ConsentEventDraft {
        user_id: body.user_id.clone(),
        offer_id: body.offer_id.clone(),
        action,
        scope: body.scope.clone(),
        purpose: body.purpose.clone(),
        initiated_by,
        reason: body.reason.clone(),
        reason_category: body.reason_category.clone(),
        metadata: body.metadata.clone(),
    };

    let event = state.ledger.record_event(draft).await?;
    Ok(HttpResponse::Created().json(event))
}

/// Full consent history for a user
pub async fn user_history(
    auth: AuthContext,
    user_id: web::Path<String>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let user_id = user_id.into_inner();
    if !auth.can_access_user(&user_id) {
        return Err(ApiError::forbidden("Cannot read another user's history"));
    }

    let events = state.ledger.user_history(&user_id).await?;
    Ok(HttpResponse::Ok().json(events))
}

/// Currently active (scope, purposes) pairs for a user
pub async fn active_scopes(
    auth: AuthContext,
    user_id: web::Path<String>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let user_id = user_id.into_inner();
    if !auth.can_access_user(&user_id) {
        return Err(ApiError::forbidden("Cannot read another user's consents"));
    }

    let scopes = state.validator.active_scopes(&user_id).await?;
    Ok(HttpResponse::Ok().json(scopes))
}

/// Verify ledger chain integrity (admin only)
pub async fn verify(
    auth: AuthContext,
    query: web::Query<VerifyQuery>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    if !auth.is_admin {
        return Err(ApiError::forbidden("Ledger verification requires admin"));
    }

    let report = state
        .ledger
        .verify_integrity(query.user_id.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(report))
}

/// Export journal records for audit (admin only)
pub async fn export_range(
    auth: AuthContext,
    query: web::Query<ExportRangeQuery>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    if !auth.is_admin {
        return Err(ApiError::forbidden("Ledger export requires admin"));
    }

    let records = state.ledger.export_range(query.start, query.end).await?;
    Ok(HttpResponse::Ok().json(records))
}

/// Signed, verifiable export bundle for a user (admin or self)
pub async fn signed_export(
    auth: AuthContext,
    user_id: web::Path<String>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let user_id = user_id.into_inner();
    if !auth.can_access_user(&user_id) {
        return Err(ApiError::forbidden("Cannot export another user's data"));
    }

    let bundle = state
        .dsr
        .generate_signed_export(&user_id, true, true)
        .await?;
    Ok(HttpResponse::Ok().json(bundle))
}
