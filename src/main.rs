/// Flowrunner server entry point
///
/// Initializes configuration and starts the HTTP server with flow management
/// and invocation endpoints.

use flowrunner::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Flow management API at /api/flows/*
/// - Flow invocation at /flows/{id}/invoke
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (defaults to 0.0.0.0:3004 and data/flows.db)
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
