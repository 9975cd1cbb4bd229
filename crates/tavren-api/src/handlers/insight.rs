//! Privacy-preserving insight handlers

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use tavren_core::insight::{InsightRequest, PrivacyMethod, PrivacyParams, QueryType};
use tavren_core::CoreError;

use crate::middleware::{ApiError, ApiResult, AuthContext};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InsightApiRequest {
    pub data: Vec<Value>,
    pub query_type: String,
    pub privacy_method: String,
    #[serde(default)]
    pub privacy_params: PrivacyParams,
    pub data_scope: Option<String>,
    pub purpose: Option<String>,
    #[serde(default = "default_validate_consent")]
    pub validate_consent: bool,
}

fn default_validate_consent() -> bool {
    true
}

fn parse_query_type(s: &str) -> Result<QueryType, ApiError> {
    match s {
        "average_store_visits" => Ok(QueryType::AverageStoreVisits),
        other => Err(ApiError::validation(format!(
            "Query type '{}' not supported",
            other
        ))),
    }
}

fn parse_privacy_method(s: &str) -> Result<PrivacyMethod, ApiError> {
    match s {
        "dp" => Ok(PrivacyMethod::Dp),
        "smpc" => Ok(PrivacyMethod::Smpc),
        other => Err(ApiError::validation(format!(
            "Privacy method '{}' not supported",
            other
        ))),
    }
}

/// Run a privacy-preserving aggregate query.
///
/// Quota limited per user; heavy computations are additionally capped to a
/// small number of concurrent runs per user.
pub async fn process_insight(
    auth: AuthContext,
    body: web::Json<InsightApiRequest>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let query_type = parse_query_type(&body.query_type)?;
    let privacy_method = parse_privacy_method(&body.privacy_method)?;

    let quota_key = format!("insight:{}", auth.user_id);
    let decision = state
        .limiter
        .allow(
            &quota_key,
            state.config.limits.insight_per_window,
            state.config.limits.insight_window_seconds,
        )
        .await;
    if !decision.allowed {
        return Err(ApiError::new(CoreError::rate_limited(
            "Insight request quota exhausted",
            decision.ttl_remaining,
        )));
    }

    // Bound per-user CPU usage
    let slot = state.insight_slot(&auth.user_id).await;
    let _permit = slot
        .acquire_owned()
        .await
        .map_err(|_| ApiError::new(CoreError::internal("Insight concurrency gate closed")))?;

    info!(
        user_id = %auth.user_id,
        query_type = %body.query_type,
        privacy_method = %body.privacy_method,
        records = body.data.len(),
        "Insight request"
    );

    let request = InsightRequest {
        data: body.data.clone(),
        query_type,
        privacy_method,
        privacy_params: body.privacy_params.clone(),
        user_id: Some(auth.user_id.clone()),
        data_scope: body.data_scope.clone(),
        purpose: body.purpose.clone(),
        validate_consent: body.validate_consent,
    };

    let outcome = state.insight.process(request).await;
    Ok(HttpResponse::Ok().json(outcome))
}
