//! Repository implementations of the core store traits

pub mod audit;
pub mod consent_event;
pub mod package;
pub mod user;
pub mod wallet;

pub use audit::PackageAuditRepository;
pub use consent_event::ConsentEventRepository;
pub use package::PackageRepository;
pub use user::UserRepository;
pub use wallet::{PayoutRepository, RewardRepository};
