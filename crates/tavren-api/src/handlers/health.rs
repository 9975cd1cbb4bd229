//! Health check handlers

use actix_web::{web, HttpResponse};

use crate::state::AppState;

/// Basic liveness response used by load balancers
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness: database reachable, limiter backend reported
pub async fn readiness_check(state: web::Data<AppState>) -> HttpResponse {
    let database_healthy = state.database_healthy().await;
    let status = if database_healthy { "ready" } else { "degraded" };

    let body = serde_json::json!({
        "status": status,
        "checks": {
            "database": database_healthy,
            "rate_limiter": state.limiter.backend(),
        },
        "version": env!("CARGO_PKG_VERSION"),
    });

    if database_healthy {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}
