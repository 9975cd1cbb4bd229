//! Tavren API server library
//!
//! Exposes the configuration, state, middleware, and route wiring so
//! integration tests can assemble the app exactly as the binary does.

pub mod config;
pub mod handlers;
pub mod logging;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use state::AppState;
