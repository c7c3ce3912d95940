mod api_doc;
mod app;
mod config;
mod error;
mod events;
mod handlers;
mod ledger;
mod models;
mod routes;
mod state;
mod store;
mod webhook;

use std::sync::Arc;

use anyhow::Context;
use config::{Config, StorageBackend};
use state::AppState;
use store::memory::MemoryStore;
use store::spanner::SpannerStore;
use store::Store;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("genii_erp=info,tower_http=info")),
        )
        .init();

    tracing::info!("genii-erp starting");

    let config = Config::from_env()?;
    config.log_startup();

    let store: Arc<dyn Store> = match config.storage_backend {
        StorageBackend::Spanner => {
            let settings = config
                .spanner
                .as_ref()
                .context("Spanner settings missing for spanner storage backend")?;
            Arc::new(SpannerStore::from_settings(settings).await?)
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let addr = format!("{}:{}", config.service_host, config.service_port);
    let state = AppState::new(store, &config);
    let app = app::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);
    tracing::info!("Swagger UI available at http://{}{}", addr, routes::SWAGGER_UI);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("genii-erp stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
