/// HTTP API Layer
///
/// REST endpoints for flow management and invocation:
/// - Flow CRUD and dry-run validation under /api/flows
/// - Invocation of a registered flow under /flows/{id}/invoke

use crate::flow::{registry::FlowRegistry, storage::FlowStorage};
use crate::runtime::FlowEngine;
use axum::{http::StatusCode, response::Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

// Flow management endpoints (POST/GET/PUT/DELETE)
pub mod flows;

// Flow invocation endpoint
pub mod invoke;

pub use flows::create_flow_routes;
pub use invoke::create_invoke_routes;

/// Shared state for every handler
#[derive(Clone)]
pub struct AppState {
    /// Flow storage for persistence
    pub storage: FlowStorage,
    /// Hot-reload registry of compiled flows
    pub registry: Arc<FlowRegistry>,
    pub engine: Arc<FlowEngine>,
}

/// Error response: status plus a JSON body
pub type ApiError = (StatusCode, Json<Value>);

pub(crate) fn api_error(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

/// All API routes bound to their state
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .merge(create_flow_routes())
        .merge(create_invoke_routes())
        .with_state(state)
}
