mod config;
mod documents;
mod errors;
mod llm_client;
mod models;
mod patch;
mod pipeline;
mod render;
mod routes;
mod state;
mod store;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::documents::DocumentStore;
use crate::llm_client::ProviderRegistry;
use crate::pipeline::{CallPolicy, Orchestrator, StageInvoker};
use crate::render::ScriptBuildTool;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::RunStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails fast on malformed values)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting résumé orchestrator v{}", env!("CARGO_PKG_VERSION"));
    info!("Workspace root: {}", config.workspace_root.display());

    // Completion providers (only those with an API key)
    let registry = ProviderRegistry::from_config(&config)?;
    let registered = registry.registered();
    if registered.is_empty() {
        warn!("No provider API keys configured; every run will fail with UnknownProvider");
    } else {
        info!("Providers registered: {registered:?}");
    }

    // Run records
    let store = RunStore::new(&config.data_root);
    info!("Run records under {}", config.data_root.display());

    // Build step
    let build_tool = ScriptBuildTool::new(&config.build_script)
        .current_dir(&config.workspace_root)
        .timeout(config.build_timeout);
    info!(
        "Build script: {} (timeout {}s)",
        config.build_script.display(),
        config.build_timeout.as_secs()
    );

    let orchestrator = Orchestrator::new(
        StageInvoker::new(registry, store.clone(), CallPolicy::default()),
        store,
        DocumentStore::new(&config.workspace_root),
        Arc::new(build_tool),
    );

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // dashboard runs on a separate origin

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
