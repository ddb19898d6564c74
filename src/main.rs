use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use custodian_api::access::{AccessRegistry, AccessResolver};
use custodian_api::app::{router, router_with_cors, AppState};
use custodian_api::database::{DatabaseManager, PgRecordStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = custodian_api::config::config();
    tracing::info!("Starting Custodian API in {:?} mode", config.environment);
    if custodian_api::is_development!() {
        tracing::warn!("Development profile: tokens are signed with the built-in secret unless JWT_SECRET is set");
    }

    // Declarations are validated once; a bad file stops startup
    let registry = AccessRegistry::load(&config.access.declarations_path)
        .with_context(|| format!("loading access declarations from {}", config.access.declarations_path))?;
    let report = registry.validate()?;
    tracing::info!(
        records = report.records,
        resources = report.resources,
        restricted = report.restricted.len(),
        "access declarations loaded"
    );
    if config.access.warn_unrestricted {
        for site in &report.unrestricted {
            tracing::warn!("Call site '{}' has no restriction policy, all callers see every record", site);
        }
    }

    let pool = DatabaseManager::connect().await.context("connecting to database")?;
    let store = Arc::new(PgRecordStore::new(pool));
    let resolver = AccessResolver::new(Arc::new(registry)).with_audit(config.access.enable_audit_logging);
    let state = AppState::new(resolver, store, config.security.jwt_secret.as_str());

    let app = if config.security.enable_cors {
        router_with_cors(state, &config.security.cors_origins)
    } else {
        router(state)
    };

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Custodian API listening on http://{}", bind_addr);
    axum::serve(listener, app).await.context("server")?;
    Ok(())
}
