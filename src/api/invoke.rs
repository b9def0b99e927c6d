/// Flow invocation endpoint
///
/// Runs a registered flow on the JSON document in the request body. The
/// invocation is tied to the request: when the client goes away the handler
/// future is dropped, which aborts every collaborator call still in flight.

use crate::api::{api_error, ApiError, AppState};
use crate::error::FlowError;
use crate::runtime::InvocationResult;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

/// Successful invocation reply
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponse {
    pub flow_id: String,
    #[serde(flatten)]
    pub result: InvocationResult,
    pub completed_at: DateTime<Utc>,
}

pub fn create_invoke_routes() -> Router<AppState> {
    Router::new().route("/flows/{id}/invoke", post(invoke_flow))
}

/// HTTP status for a terminal invocation failure
fn status_for(err: &FlowError) -> StatusCode {
    match err {
        FlowError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        FlowError::Extraction { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        FlowError::Collaborator { .. } => StatusCode::BAD_GATEWAY,
        FlowError::StuckGraph { .. } | FlowError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure(err: &FlowError) -> ApiError {
    (
        status_for(err),
        Json(json!({
            "error": err.to_string(),
            "category": err.category(),
            "node": err.failing_node(),
            "kind": err.kind(),
            "branch": err.branch(),
        })),
    )
}

/// Invoke a flow
///
/// POST /flows/{id}/invoke
/// Body: the JSON object published by the flow's Input node
async fn invoke_flow(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
    body: String,
) -> Result<Json<InvocationResponse>, ApiError> {
    tracing::info!("📥 Invocation request received for flow: {}", flow_id);
    tracing::debug!("📄 Request body: {}", body);

    // Parse manually so malformed bodies get a JSON error reply
    let input: Value = match serde_json::from_str(&body) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("❌ Invalid JSON body for flow {}: {}", flow_id, e);
            return Err(api_error(StatusCode::BAD_REQUEST, format!("invalid JSON body: {}", e)));
        }
    };

    let Some(flow) = state.registry.get_flow(&flow_id) else {
        tracing::warn!("❌ Invocation requested for unknown flow: {}", flow_id);
        return Err(api_error(StatusCode::NOT_FOUND, format!("flow '{}' not found", flow_id)));
    };

    match state.engine.invoke(&flow, input).await {
        Ok(result) => Ok(Json(InvocationResponse {
            flow_id,
            result,
            completed_at: Utc::now(),
        })),
        Err(e) => {
            let chain: Vec<String> = std::iter::successors(std::error::Error::source(&e), |err| err.source())
                .map(|err| err.to_string())
                .collect();
            if !chain.is_empty() {
                tracing::debug!("🔍 Error chain: {}", chain.join(" → "));
            }
            Err(failure(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{send, state};
    use crate::error::CollaboratorError;
    use crate::flow::registry::CompiledFlow;
    use crate::flow::types::{Connection, FlowDefinition, NodeDefinition, PayloadType};
    use crate::runtime::testing::{ScriptedFunctions, ScriptedModel};

    fn shout_flow() -> CompiledFlow {
        let definition = FlowDefinition::new("shout", "Shout")
            .node(NodeDefinition::input_node("in"))
            .node(
                NodeDefinition::function("shout", "shout")
                    .input("codeHookInput", PayloadType::String, Some("$.data.text"))
                    .output("functionResponse", PayloadType::String),
            )
            .node(NodeDefinition::output_node("out", PayloadType::String))
            .connect(Connection::new("in", "document", "shout", "codeHookInput", PayloadType::Object))
            .connect(Connection::new("shout", "functionResponse", "out", "document", PayloadType::String));
        CompiledFlow::compile(definition).unwrap()
    }

    fn upper(input: Value) -> Result<Value, CollaboratorError> {
        match input.as_str() {
            Some("boom") => Err(CollaboratorError::failed("exploded")),
            Some(text) => Ok(json!(text.to_uppercase())),
            None => Err(CollaboratorError::failed("not a string")),
        }
    }

    async fn shout_state() -> (tempfile::TempDir, AppState) {
        let (dir, state) = state(ScriptedFunctions::new().respond("shout", upper), ScriptedModel::new()).await;
        state.registry.register(shout_flow());
        (dir, state)
    }

    #[tokio::test]
    async fn test_invoke_returns_output() {
        let (_dir, state) = shout_state().await;

        let (status, body) = send(&state, "POST", "/flows/shout/invoke", Some(json!({ "text": "hello" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["flowId"], "shout");
        assert_eq!(body["output"], "HELLO");
        assert_eq!(body["collaboratorCalls"], 1);
        assert!(body["invocationId"].is_string());
        assert!(body["completedAt"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_flow_is_not_found() {
        let (_dir, state) = shout_state().await;

        let (status, _) = send(&state, "POST", "/flows/missing/invoke", Some(json!({ "text": "x" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bad_bodies_are_rejected() {
        let (_dir, state) = shout_state().await;

        let (status, body) = send(&state, "POST", "/flows/shout/invoke", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("invalid JSON"));

        let (status, body) = send(&state, "POST", "/flows/shout/invoke", Some(json!(["not", "an", "object"]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["category"], "invalid_input");
    }

    #[tokio::test]
    async fn test_failures_name_the_node() {
        let (_dir, state) = shout_state().await;

        let (status, body) = send(&state, "POST", "/flows/shout/invoke", Some(json!({ "text": "boom" }))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["category"], "collaborator");
        assert_eq!(body["node"], "shout");
        assert_eq!(body["kind"], "Function");
        assert_eq!(body["branch"], Value::Null);

        let (status, body) = send(&state, "POST", "/flows/shout/invoke", Some(json!({ "other": 1 }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["category"], "extraction");
        assert_eq!(body["node"], "shout");
    }
}
