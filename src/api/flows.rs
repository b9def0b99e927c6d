/// Flow management REST API endpoints
///
/// CRUD over stored flow definitions. Every write is validated first, so the
/// store and the registry only ever hold flows that can be invoked; a
/// successful write swaps the compiled flow into the registry immediately.

use crate::api::{api_error, ApiError, AppState};
use crate::flow::{registry::CompiledFlow, types::FlowDefinition, ValidationError};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Response for flow creation/update operations
#[derive(Debug, Serialize)]
pub struct FlowResponse {
    pub id: String,
    pub message: String,
}

/// Request body carrying a flow definition
#[derive(Debug, Deserialize)]
pub struct FlowRequest {
    pub flow: FlowDefinition,
}

/// Create flow management routes
pub fn create_flow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/flows", post(create_flow).get(list_flows))
        .route("/api/flows/validate", post(validate_flow))
        .route("/api/flows/{id}", get(get_flow).put(update_flow).delete(delete_flow))
}

fn validation_failure(err: &ValidationError) -> ApiError {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "error": err.to_string(), "category": "validation" })),
    )
}

fn compile(flow: FlowDefinition) -> Result<CompiledFlow, ApiError> {
    if flow.id.is_empty() || flow.name.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "flow id and name are required"));
    }
    CompiledFlow::compile(flow).map_err(|e| {
        tracing::warn!("⚠️ Rejected invalid flow definition: {}", e);
        validation_failure(&e)
    })
}

/// Create a new flow
///
/// POST /api/flows
/// Body: { "flow": { "id": "...", "name": "...", "nodes": [...], "connections": [...] } }
async fn create_flow(
    State(state): State<AppState>,
    Json(payload): Json<FlowRequest>,
) -> Result<(StatusCode, Json<FlowResponse>), ApiError> {
    let compiled = compile(payload.flow)?;

    // The insert itself decides duplicates, so concurrent creates cannot overwrite each other
    match state.storage.insert_flow(compiled.definition()).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!("⚠️ Flow {} already exists", compiled.id());
            return Err(api_error(
                StatusCode::CONFLICT,
                format!("flow '{}' already exists", compiled.id()),
            ));
        }
        Err(e) => {
            tracing::error!("Failed to save flow: {}", e);
            return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e));
        }
    }

    let response = FlowResponse {
        id: compiled.id().to_string(),
        message: format!("Flow '{}' created successfully", compiled.definition().name),
    };
    tracing::info!("🔥 Created flow: {} ({})", response.id, compiled.definition().name);
    state.registry.register(compiled);

    Ok((StatusCode::CREATED, Json(response)))
}

/// List all flows
///
/// GET /api/flows
/// Returns: { "flows": [{ "id": "...", "name": "...", "created_at": "...", "updated_at": "..." }] }
async fn list_flows(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    match state.storage.list_flows().await {
        Ok(flows) => Ok(Json(json!({ "flows": flows }))),
        Err(e) => {
            tracing::error!("Failed to list flows: {}", e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e))
        }
    }
}

/// Get a specific flow by ID
///
/// GET /api/flows/{id}
async fn get_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FlowDefinition>, ApiError> {
    match state.storage.get_flow(&id).await {
        Ok(Some(flow)) => Ok(Json(flow)),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, format!("flow '{}' not found", id))),
        Err(e) => {
            tracing::error!("Failed to get flow {}: {}", id, e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e))
        }
    }
}

/// Replace an existing flow
///
/// PUT /api/flows/{id}
/// The path id wins over any id in the body.
async fn update_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<FlowRequest>,
) -> Result<Json<FlowResponse>, ApiError> {
    let mut flow = payload.flow;
    flow.id = id.clone();

    let compiled = compile(flow)?;

    match state.storage.update_flow(compiled.definition()).await {
        Ok(true) => {}
        Ok(false) => return Err(api_error(StatusCode::NOT_FOUND, format!("flow '{}' not found", id))),
        Err(e) => {
            tracing::error!("Failed to update flow: {}", e);
            return Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e));
        }
    }

    let response = FlowResponse {
        id: id.clone(),
        message: format!("Flow '{}' updated successfully", compiled.definition().name),
    };
    state.registry.register(compiled);
    tracing::info!("🔄 Updated flow: {}", id);

    Ok(Json(response))
}

/// Delete a flow
///
/// DELETE /api/flows/{id}
async fn delete_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FlowResponse>, ApiError> {
    match state.storage.delete_flow(&id).await {
        Ok(true) => {
            state.registry.remove_flow(&id);
            tracing::info!("🗑️ Deleted flow: {}", id);
            Ok(Json(FlowResponse {
                id: id.clone(),
                message: format!("Flow '{}' deleted successfully", id),
            }))
        }
        Ok(false) => Err(api_error(StatusCode::NOT_FOUND, format!("flow '{}' not found", id))),
        Err(e) => {
            tracing::error!("Failed to delete flow {}: {}", id, e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e))
        }
    }
}

/// Validate a definition without storing it
///
/// POST /api/flows/validate
/// Returns the execution order and fan-out regions of a valid flow.
async fn validate_flow(Json(payload): Json<FlowRequest>) -> Result<Json<Value>, ApiError> {
    let compiled = CompiledFlow::compile(payload.flow).map_err(|e| validation_failure(&e))?;
    let graph = &compiled.graph;

    let order: Vec<&str> = compiled
        .layout
        .order
        .iter()
        .map(|&index| graph.node(index).name.as_str())
        .collect();

    let regions: Vec<Value> = compiled
        .layout
        .regions
        .iter()
        .map(|region| {
            json!({
                "iterator": graph.node(region.iterator).name,
                "collector": graph.node(region.collector).name,
                "members": region
                    .members
                    .iter()
                    .map(|&index| graph.node(index).name.as_str())
                    .collect::<Vec<_>>(),
            })
        })
        .collect();

    Ok(Json(json!({
        "valid": true,
        "id": compiled.id(),
        "order": order,
        "regions": regions,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{send, state};
    use crate::flow::research::research_flow;
    use crate::flow::types::{Connection, NodeDefinition, PayloadType};
    use crate::runtime::testing::{ScriptedFunctions, ScriptedModel};

    fn echo_flow(id: &str) -> FlowDefinition {
        FlowDefinition::new(id, "Echo")
            .node(NodeDefinition::input_node("in"))
            .node(
                NodeDefinition::function("echo", "echo")
                    .input("codeHookInput", PayloadType::String, Some("$.data.text"))
                    .output("functionResponse", PayloadType::String),
            )
            .node(NodeDefinition::output_node("out", PayloadType::String))
            .connect(Connection::new("in", "document", "echo", "codeHookInput", PayloadType::Object))
            .connect(Connection::new("echo", "functionResponse", "out", "document", PayloadType::String))
    }

    #[tokio::test]
    async fn test_create_get_list_delete() {
        let (_dir, state) = state(ScriptedFunctions::new(), ScriptedModel::new()).await;

        let (status, body) = send(&state, "POST", "/api/flows", Some(json!({ "flow": echo_flow("echo") }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], "echo");
        assert!(state.registry.get_flow("echo").is_some());

        let (status, body) = send(&state, "GET", "/api/flows/echo", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["nodes"].as_array().unwrap().len(), 3);

        let (status, body) = send(&state, "GET", "/api/flows", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["flows"][0]["id"], "echo");

        let (status, _) = send(&state, "DELETE", "/api/flows/echo", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.registry.get_flow("echo").is_none());

        let (status, _) = send(&state, "GET", "/api/flows/echo", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let (_dir, state) = state(ScriptedFunctions::new(), ScriptedModel::new()).await;

        let body = json!({ "flow": echo_flow("echo") });
        let (status, _) = send(&state, "POST", "/api/flows", Some(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = send(&state, "POST", "/api/flows", Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_concurrent_creates_never_overwrite() {
        let (_dir, state) = state(ScriptedFunctions::new(), ScriptedModel::new()).await;

        let mut first = echo_flow("echo");
        first.name = "First".to_string();
        let mut second = echo_flow("echo");
        second.name = "Second".to_string();

        let ((status_a, _), (status_b, _)) = tokio::join!(
            send(&state, "POST", "/api/flows", Some(json!({ "flow": first }))),
            send(&state, "POST", "/api/flows", Some(json!({ "flow": second }))),
        );
        let mut statuses = [status_a, status_b];
        statuses.sort();
        assert_eq!(statuses, [StatusCode::CREATED, StatusCode::CONFLICT]);

        // storage and registry agree on the single winner
        let winner = if status_a == StatusCode::CREATED { "First" } else { "Second" };
        assert_eq!(state.storage.get_flow("echo").await.unwrap().unwrap().name, winner);
        assert_eq!(state.registry.get_flow("echo").unwrap().definition().name, winner);
    }

    #[tokio::test]
    async fn test_invalid_flow_is_rejected_and_not_stored() {
        let (_dir, state) = state(ScriptedFunctions::new(), ScriptedModel::new()).await;

        // Drop the Output node: "echo -> out" now references an unknown node
        let mut flow = echo_flow("broken");
        flow.nodes.retain(|n| n.name != "out");

        let (status, body) = send(&state, "POST", "/api/flows", Some(json!({ "flow": flow }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["category"], "validation");
        assert!(body["error"].as_str().unwrap().contains("'out'"));

        assert!(state.storage.get_flow("broken").await.unwrap().is_none());
        assert!(state.registry.get_flow("broken").is_none());
    }

    #[tokio::test]
    async fn test_update_replaces_registered_flow() {
        let (_dir, state) = state(ScriptedFunctions::new(), ScriptedModel::new()).await;

        let (status, _) = send(&state, "PUT", "/api/flows/echo", Some(json!({ "flow": echo_flow("echo") }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        send(&state, "POST", "/api/flows", Some(json!({ "flow": echo_flow("echo") }))).await;

        let mut renamed = echo_flow("ignored");
        renamed.name = "Echo v2".to_string();
        let (status, _) = send(&state, "PUT", "/api/flows/echo", Some(json!({ "flow": renamed }))).await;
        assert_eq!(status, StatusCode::OK);

        let registered = state.registry.get_flow("echo").unwrap();
        assert_eq!(registered.definition().name, "Echo v2");
        assert!(state.storage.get_flow("ignored").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_validate_reports_regions() {
        let (_dir, state) = state(ScriptedFunctions::new(), ScriptedModel::new()).await;

        let (status, body) =
            send(&state, "POST", "/api/flows/validate", Some(json!({ "flow": research_flow() }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);
        assert_eq!(body["order"][0], "FlowInputNode");
        assert_eq!(body["regions"][0]["iterator"], "IteratorNode_1");
        assert_eq!(body["regions"][0]["collector"], "CollectorNode_1");
        assert_eq!(body["regions"][0]["members"].as_array().unwrap().len(), 4);

        // Nothing is persisted by a dry run
        assert!(state.storage.get_flow("research").await.unwrap().is_none());
    }
}
