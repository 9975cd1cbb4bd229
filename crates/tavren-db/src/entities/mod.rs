//! SeaORM entity models
//!
//! Table models plus conversions to and from the domain types in
//! `tavren-core`.

pub mod consent_event;
pub mod data_package;
pub mod package_audit;
pub mod payout_request;
pub mod reward;
pub mod user;

pub use sea_orm::entity::prelude::*;
pub use serde::{Deserialize, Serialize};
