//! artifact_gov_server — axum REST surface over the governance core.

pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod middleware;
pub mod router;
