//! Server configuration from environment variables.
//!
//!   ARTIFACT_GOV_JWT_SECRET            — JWT HMAC secret (required)
//!   ARTIFACT_GOV_BIND_ADDR             — listen address (default: 0.0.0.0:4200)
//!   ARTIFACT_GOV_DATABASE_URL          — Postgres URL; absent → in-memory store
//!   ARTIFACT_GOV_MAX_PUBLISH_ITEMS     — preflight item ceiling
//!   ARTIFACT_GOV_STORE_BATCH_LIMIT     — writes per atomic commit
//!   ARTIFACT_GOV_CASCADE_CHUNK_SIZE    — deletes per cascade chunk
//!   ARTIFACT_GOV_PUBLISH_TIMEOUT_MS
//!   ARTIFACT_GOV_CASCADE_TIMEOUT_MS
//!   ARTIFACT_GOV_VERSION_RETRIES       — version counter CAS retries
//!   ARTIFACT_GOV_BOOTSTRAP_MAX_ATTEMPTS
//!   ARTIFACT_GOV_BOOTSTRAP_WINDOW_SECS

use std::str::FromStr;

use anyhow::{anyhow, Context};
use artifact_gov_core::GovernanceConfig;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:4200";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub jwt_secret: String,
    pub database_url: Option<String>,
    pub governance: GovernanceConfig,
}

impl ServerConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("ARTIFACT_GOV_JWT_SECRET")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("ARTIFACT_GOV_JWT_SECRET must be set"))?;

        let mut governance = GovernanceConfig::default();
        override_with(&lookup, "ARTIFACT_GOV_MAX_PUBLISH_ITEMS", &mut governance.max_publish_items)?;
        override_with(&lookup, "ARTIFACT_GOV_STORE_BATCH_LIMIT", &mut governance.store_batch_limit)?;
        override_with(&lookup, "ARTIFACT_GOV_CASCADE_CHUNK_SIZE", &mut governance.cascade_chunk_size)?;
        override_with(&lookup, "ARTIFACT_GOV_PUBLISH_TIMEOUT_MS", &mut governance.publish_timeout_ms)?;
        override_with(&lookup, "ARTIFACT_GOV_CASCADE_TIMEOUT_MS", &mut governance.cascade_timeout_ms)?;
        override_with(
            &lookup,
            "ARTIFACT_GOV_VERSION_RETRIES",
            &mut governance.version_counter_max_retries,
        )?;
        override_with(
            &lookup,
            "ARTIFACT_GOV_BOOTSTRAP_MAX_ATTEMPTS",
            &mut governance.bootstrap_max_attempts,
        )?;
        override_with(
            &lookup,
            "ARTIFACT_GOV_BOOTSTRAP_WINDOW_SECS",
            &mut governance.bootstrap_window_secs,
        )?;
        governance.validate()?;

        Ok(Self {
            bind_addr: lookup("ARTIFACT_GOV_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.into()),
            jwt_secret,
            database_url: lookup("ARTIFACT_GOV_DATABASE_URL").filter(|s| !s.is_empty()),
            governance,
        })
    }
}

fn override_with<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> anyhow::Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = lookup(key) {
        *slot = raw.trim().parse().with_context(|| format!("{key}={raw}"))?;
    }
    Ok(())
}
