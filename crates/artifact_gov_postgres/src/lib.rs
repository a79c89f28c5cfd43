//! PostgreSQL adapter for the artifact governance core.

pub mod store;

pub use store::PgDocumentStore;

use anyhow::anyhow;
use sqlx::PgPool;

use artifact_gov_core::error::GovernanceError;

const INIT_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Apply the schema. Idempotent.
pub async fn migrate(pool: &PgPool) -> Result<(), GovernanceError> {
    sqlx::raw_sql(INIT_SQL)
        .execute(pool)
        .await
        .map_err(|e| anyhow!(e))?;
    tracing::info!(target: "governance.store", "artifact_gov schema applied");
    Ok(())
}
