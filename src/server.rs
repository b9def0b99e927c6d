/// Server setup and initialization
///
/// Wires together all components: storage, registry, collaborators, the flow
/// engine, and HTTP routes. Provides the application factory for the Axum app.

use crate::{
    api::{create_api_router, AppState},
    config::Config,
    flow::{
        registry::FlowRegistry,
        research::{research_flow, RESEARCH_FLOW_ID},
        storage::FlowStorage,
    },
    runtime::{
        http::{HttpFunctionInvoker, HttpModelInvoker},
        invoker::{FunctionRegistry, ModelInvoker, UnconfiguredModel},
        FlowEngine,
    },
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Build the collaborators and the engine from configuration
pub fn build_engine(config: &Config) -> FlowEngine {
    let mut functions = FunctionRegistry::with_builtins();
    let endpoints = &config.collaborators.function_endpoints;
    if !endpoints.is_empty() {
        tracing::info!("🔗 Routing {} remote function(s) over HTTP", endpoints.len());
        functions = functions.with_fallback(Arc::new(HttpFunctionInvoker::new(endpoints.clone())));
    }
    tracing::debug!("🧩 Local functions: {}", functions.function_names().join(", "));

    let models: Arc<dyn ModelInvoker> = match &config.collaborators.model_endpoint {
        Some(endpoint) => {
            tracing::info!("🧠 Model endpoint: {}", endpoint);
            Arc::new(HttpModelInvoker::new(endpoint.clone(), config.collaborators.models.clone()))
        }
        None => {
            tracing::warn!("⚠️ No model endpoint configured; ModelPrompt nodes will fail");
            Arc::new(UnconfiguredModel)
        }
    };

    FlowEngine::new(&config.engine, Arc::new(functions), models)
}

/// Store the bundled research flow unless a flow with its id already exists
async fn seed_research_flow(storage: &FlowStorage) -> Result<()> {
    if storage.insert_flow(&research_flow()).await? {
        tracing::info!("🌱 Seeded bundled flow '{}'", RESEARCH_FLOW_ID);
    }
    Ok(())
}

/// Create the main Axum application with all routes
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("📋 Opening flow storage: {}", config.database.path);
    let storage = FlowStorage::connect(&config.database.path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open flow storage: {}", e))?;

    seed_research_flow(&storage)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to seed bundled flows: {}", e))?;

    tracing::info!("📊 Initializing flow registry");
    let registry = Arc::new(FlowRegistry::new(storage.clone()));
    registry
        .init_from_storage()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load flows from storage: {}", e))?;

    tracing::info!("🚀 Initializing flow engine");
    let engine = Arc::new(build_engine(&config));

    let state = AppState {
        storage,
        registry,
        engine,
    };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_api_router(state));

    tracing::info!("✅ Application initialized successfully");
    Ok(app)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowrunner=info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting flowrunner server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}
