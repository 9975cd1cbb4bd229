//! Domain entities shared across services

pub mod consent;
pub mod package;
pub mod user;
pub mod wallet;

pub use consent::{ConsentAction, ConsentEvent, ConsentEventDraft, InitiatedBy};
pub use package::{
    AccessLevel, AnonymizationLevel, AuditOperation, DataPackage, PackageAuditRecord,
    PackageMetadata, TrustTier,
};
pub use user::User;
pub use wallet::{PayoutRequest, PayoutStatus, Reward};
