use actix_web::{middleware::DefaultHeaders, web, App, HttpServer};
use tracing::{error, info};

use tavren_api::config::ApiConfig;
use tavren_api::middleware::{self, RateLimit, RequestId};
use tavren_api::routes;
use tavren_api::state::AppState;
use tavren_api::logging;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = match ApiConfig::from_env() {
        Ok(config) => {
            if let Err(e) = config.validate() {
                eprintln!("Configuration validation failed: {}", e);
                std::process::exit(1);
            }
            config
        }
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(
        "Starting Tavren API server v{} on {}",
        env!("CARGO_PKG_VERSION"),
        config.server_address()
    );

    let app_state = match AppState::new(config.clone()).await {
        Ok(state) => {
            info!("Application state initialized");
            state
        }
        Err(e) => {
            error!("Failed to initialize application state: {}", e);
            std::process::exit(1);
        }
    };

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Request ID first so every later middleware can tag its logs
            .wrap(RequestId)
            .wrap(RateLimit)
            .wrap(middleware::setup_cors())
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("X-Frame-Options", "DENY"))
                    .add(("Referrer-Policy", "strict-origin-when-cross-origin")),
            )
            .configure(routes::configure_routes)
    });

    let server = if let Some(workers) = config.server.workers {
        info!("Setting worker threads to: {}", workers);
        server.workers(workers)
    } else {
        server
    };

    let server = server.bind(&config.server_address())?.run();
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    info!("Tavren API ready on {}", config.server_address());

    shutdown_signal().await;
    info!("Tavren API shutting down");

    server_handle.stop(true).await;
    match server_task.await {
        Ok(Ok(())) => info!("Server shut down successfully"),
        Ok(Err(e)) => error!("Server error during shutdown: {}", e),
        Err(e) => error!("Failed to shut down server task: {}", e),
    }

    Ok(())
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_name() {
        assert_eq!(env!("CARGO_PKG_NAME"), "tavren-api");
    }

    #[tokio::test]
    async fn test_graceful_shutdown_compiles() {
        tokio::select! {
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(1)) => {},
            _ = shutdown_signal() => {},
        }
    }
}
