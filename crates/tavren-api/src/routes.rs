use actix_web::{web, HttpResponse, Scope};

use crate::handlers::{agent, buyers, consent_ledger, data_packages, dsr, health, insight};

/// Configure all application routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health_routes())
        .service(consent_ledger_routes())
        .service(dsr_routes())
        .service(data_package_routes())
        .service(insight_routes())
        .service(agent_routes())
        .service(buyer_routes())
        .service(offer_routes())
        .route("/", web::get().to(root_handler));
}

fn health_routes() -> Scope {
    web::scope("/health")
        .route("", web::get().to(health::health_check))
        .route("/ready", web::get().to(health::readiness_check))
        .route("/live", web::get().to(health::health_check))
}

fn consent_ledger_routes() -> Scope {
    web::scope("/api/consent-ledger")
        .route("", web::post().to(consent_ledger::record_event))
        .route("/verify", web::get().to(consent_ledger::verify))
        .route("/export-range", web::get().to(consent_ledger::export_range))
        .route(
            "/export/{user_id}",
            web::get().to(consent_ledger::signed_export),
        )
        .route("/users/{user_id}", web::get().to(consent_ledger::user_history))
        .route(
            "/users/{user_id}/active-scopes",
            web::get().to(consent_ledger::active_scopes),
        )
}

fn dsr_routes() -> Scope {
    web::scope("/api/dsr")
        .route("/restrict", web::post().to(dsr::restrict))
        .route("/delete", web::post().to(dsr::delete))
        .route("/export", web::get().to(dsr::export))
}

fn data_package_routes() -> Scope {
    web::scope("/api/data-packages")
        .route("", web::post().to(data_packages::create_package))
        .route(
            "/validate-token",
            web::post().to(data_packages::validate_token),
        )
        .route("/{package_id}", web::get().to(data_packages::fetch_package))
}

fn insight_routes() -> Scope {
    web::scope("/api/insight").route("", web::post().to(insight::process_insight))
}

fn agent_routes() -> Scope {
    web::scope("/api/agent")
        .route("/message", web::post().to(agent::process_message))
        .route("/logs/{user_id}", web::get().to(agent::agent_logs))
        .route(
            "/data/payload/{consent_id}",
            web::get().to(agent::data_payload),
        )
}

fn buyer_routes() -> Scope {
    web::scope("/api/buyers").route("/insights", web::get().to(buyers::buyer_insights))
}

fn offer_routes() -> Scope {
    web::scope("/api/offers")
        .route(
            "/available/{buyer_id}",
            web::get().to(buyers::buyer_access_level),
        )
        .route("/feed/{buyer_id}", web::get().to(buyers::offer_feed))
}

async fn root_handler() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "service": "tavren-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
