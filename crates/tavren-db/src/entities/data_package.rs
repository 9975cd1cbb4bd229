//! Data package entity model for SeaORM
//!
//! The full package is stored as a JSON payload; the indexed columns exist
//! for lookup and expiry sweeps.

use super::*;
use tavren_core::entities::package::DataPackage;

use crate::error::DatabaseError;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "data_packages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub package_id: String,

    #[sea_orm(indexed)]
    pub user_id: String,

    #[sea_orm(indexed)]
    pub consent_id: i64,

    pub data_type: String,

    pub created_at: chrono::DateTime<chrono::Utc>,

    #[sea_orm(indexed)]
    pub expires_at: chrono::DateTime<chrono::Utc>,

    #[sea_orm(column_type = "Json")]
    pub payload: Json,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn from_domain(package: &DataPackage) -> Result<Self, DatabaseError> {
        Ok(Self {
            package_id: package.package_id.clone(),
            user_id: package.user_id.clone(),
            consent_id: package.consent_id,
            data_type: package.data_type.clone(),
            created_at: package.created_at,
            expires_at: package.expires_at,
            payload: serde_json::to_value(package)?,
        })
    }

    pub fn into_domain(self) -> Result<DataPackage, DatabaseError> {
        Ok(serde_json::from_value(self.payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tavren_core::entities::package::{
        AccessLevel, AnonymizationLevel, PackageContent, PackageMetadata, TrustTier,
    };

    #[test]
    fn test_round_trip_through_payload() {
        let package = DataPackage {
            tavren_data_package: "1.1".into(),
            package_id: "pkg-1".into(),
            consent_id: 7,
            user_id: "u1".into(),
            created_at: chrono::Utc::now(),
            data_type: "location".into(),
            access_level: AccessLevel::AnonymousShortTerm,
            anonymization_level: AnonymizationLevel::Strong,
            purpose: "analytics".into(),
            expires_at: chrono::Utc::now(),
            status: None,
            reason: None,
            access_token: Some("a.b.c".into()),
            content: PackageContent::Records(vec![serde_json::json!({"x": 1})]),
            metadata: PackageMetadata {
                record_count: 1,
                schema_version: "1.0".into(),
                data_quality_score: 0.9,
                buyer_id: None,
                trust_tier: TrustTier::Standard,
                encryption_status: "none".into(),
                mcp_context: serde_json::Value::Null,
                error_details: None,
            },
        };

        let model = Model::from_domain(&package).unwrap();
        assert_eq!(model.package_id, "pkg-1");
        let restored = model.into_domain().unwrap();
        assert_eq!(restored.consent_id, 7);
        assert_eq!(restored.metadata.record_count, 1);
    }
}
