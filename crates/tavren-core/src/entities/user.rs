//! User profile entity
//!
//! Authentication and session issuance live outside this service; the
//! profile here is the minimal record the DSR engine exports and deletes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub is_active: bool,
}

impl User {
    /// Profile fields safe to include in a DSR export
    pub fn export_view(&self) -> serde_json::Value {
        serde_json::json!({
            "username": self.username,
            "email": self.email,
            "is_active": self.is_active,
        })
    }
}
