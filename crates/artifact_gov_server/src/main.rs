//! artifact_gov_server — REST server for artifact governance.
//!
//! Configuration is read from the environment; see [`artifact_gov_server::config`].
//! Without `ARTIFACT_GOV_DATABASE_URL` the server runs on the in-memory store.

use std::sync::Arc;

use anyhow::Context;
use artifact_gov_core::events::{EventDispatcher, EventQueue};
use artifact_gov_core::memory::MemoryStore;
use artifact_gov_core::ports::SharedStore;
use artifact_gov_core::service::GovernanceServiceImpl;
use artifact_gov_postgres::PgDocumentStore;
use artifact_gov_server::config::ServerConfig;
use artifact_gov_server::events::LoggingEventHandler;
use artifact_gov_server::middleware::jwt::JwtConfig;
use artifact_gov_server::router::build_router;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,artifact_gov_server=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;

    let store: SharedStore = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("failed to connect to database")?;
            artifact_gov_postgres::migrate(&pool).await?;
            tracing::info!("Connected to database, migrations applied");
            Arc::new(PgDocumentStore::new(pool))
        }
        None => {
            tracing::warn!("ARTIFACT_GOV_DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // Events are delivered after commit by a background dispatcher.
    let (queue, rx) = EventQueue::new();
    let dispatcher = EventDispatcher::new(rx)
        .register(Arc::new(LoggingEventHandler))
        .spawn();

    let service = GovernanceServiceImpl::shared(store, Arc::new(queue), config.governance.clone())?;
    let jwt_config = JwtConfig::from_secret(config.jwt_secret.as_bytes());

    let app = build_router(service, jwt_config).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;
    tracing::info!("artifact_gov_server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("server error")?;

    // Dropping the router drops the last queue sender; let the dispatcher drain.
    if let Err(e) = dispatcher.await {
        tracing::warn!(error = %e, "event dispatcher ended abnormally");
    }
    Ok(())
}
