pub mod audit;
pub mod change_sets;
pub mod health;
pub mod orgs;
pub mod records;
pub mod review;
pub mod versions;

/// Shared service handle carried as a request extension.
pub type Service = std::sync::Arc<dyn artifact_gov_core::service::GovernanceService>;
