//! Artifact governance core — pure domain types, port traits, workflow logic.
//!
//! Regulated insurance artifacts (products, coverages, forms, rules, rate
//! programs, state programs) are edited as versioned drafts, grouped into
//! ChangeSets, reviewed per role, checked by a read-only preflight, and then
//! published in one atomic commit.
//!
//! Storage is reached only through the traits in [`ports`]; the in-memory
//! [`memory::MemoryStore`] implements all of them and backs the test suites.

pub mod approval;
pub mod audit;
pub mod cascade;
pub mod changesets;
pub mod config;
pub mod error;
pub mod events;
pub mod memory;
pub mod orgs;
pub mod ports;
pub mod preflight;
pub mod principal;
pub mod publish;
pub mod roles;
pub mod service;
pub mod telemetry;
pub mod types;
pub mod versions;

pub use config::GovernanceConfig;
pub use error::GovernanceError;
pub use principal::Principal;
