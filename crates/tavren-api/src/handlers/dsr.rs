//! Data Subject Request handlers

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use tracing::info;

use tavren_core::dsr::DeleteOptions;
use tavren_core::CoreError;

use crate::middleware::{ApiError, ApiResult, AuthContext};
use crate::state::AppState;

/// Seconds in the DSR export quota window
const EXPORT_WINDOW_SECONDS: u64 = 86_400;

#[derive(Debug, Deserialize)]
pub struct RestrictRequest {
    pub scope: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DeleteRequest {
    pub delete_profile: Option<bool>,
    pub delete_consent: Option<bool>,
}

/// Restrict all future processing for the caller
pub async fn restrict(
    auth: AuthContext,
    body: web::Json<RestrictRequest>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    info!(user_id = %auth.user_id, "DSR restriction requested");

    let report = state
        .dsr
        .restrict_processing(&auth.user_id, body.scope.as_deref(), body.reason.as_deref())
        .await?;
    Ok(HttpResponse::Ok().json(report))
}

/// Delete the caller's data
pub async fn delete(
    auth: AuthContext,
    body: web::Json<DeleteRequest>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    info!(user_id = %auth.user_id, "DSR deletion requested");

    let options = DeleteOptions {
        delete_profile: body.delete_profile.unwrap_or(true),
        delete_consent: body.delete_consent.unwrap_or(false),
    };
    let report = state.dsr.delete_user_data(&auth.user_id, options).await?;
    Ok(HttpResponse::Ok().json(report))
}

/// Self-service data export, quota limited to one per day for non-admins
pub async fn export(auth: AuthContext, state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let quota_key = format!("dsr:export:{}", auth.user_id);

    if !auth.is_admin {
        let allowed = state
            .limiter
            .check(&quota_key, state.config.limits.dsr_export_per_day)
            .await;
        if !allowed {
            let retry_after = state
                .limiter
                .last_request(&quota_key, EXPORT_WINDOW_SECONDS)
                .await
                .map(|last| {
                    let elapsed = (chrono::Utc::now() - last).num_seconds().max(0) as u64;
                    EXPORT_WINDOW_SECONDS.saturating_sub(elapsed)
                })
                .unwrap_or(EXPORT_WINDOW_SECONDS);
            return Err(ApiError::new(CoreError::rate_limited(
                "Data export limited to one request per day",
                retry_after,
            )));
        }
    }

    info!(user_id = %auth.user_id, "DSR export requested");
    let export = state.dsr.export_user_data(&auth.user_id).await?;

    // Consume the quota only after the export succeeded
    if !auth.is_admin {
        state.limiter.touch(&quota_key, EXPORT_WINDOW_SECONDS).await;
    }

    Ok(HttpResponse::Ok().json(export))
}
