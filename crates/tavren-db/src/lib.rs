//! Tavren database layer
//!
//! SeaORM entity models and repository implementations of the storage
//! traits defined in `tavren-core`. Postgres in production (row-level and
//! advisory locking), SQLite for development.

pub mod connection;
pub mod entities;
pub mod error;
pub mod repositories;
pub mod schema;

pub use connection::connect;
pub use error::{DatabaseError, Result};
