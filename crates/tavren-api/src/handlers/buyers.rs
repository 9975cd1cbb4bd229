//! Buyer trust and offer handlers

use actix_web::{web, HttpResponse};
use tracing::info;

use crate::middleware::{ApiResult, AuthContext};
use crate::state::AppState;

/// Trust statistics for all buyers
pub async fn buyer_insights(
    _auth: AuthContext,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let stats = state.trust.buyer_trust_stats().await?;
    info!(buyers = stats.len(), "Computed buyer trust stats");
    Ok(HttpResponse::Ok().json(stats))
}

/// A buyer's access level derived from its trust score
pub async fn buyer_access_level(
    buyer_id: web::Path<String>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let access = state.trust.buyer_access_level(&buyer_id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(access))
}

/// Offers compatible with the buyer's access level
pub async fn offer_feed(
    buyer_id: web::Path<String>,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let offers = state.trust.filtered_offers(&buyer_id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(offers))
}
