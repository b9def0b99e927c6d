/// HTTP collaborators
///
/// reqwest-backed implementations of the Function and Model invokers.
///
/// Function request: `POST {endpoint}` with `{ "function", "input" }`; the
/// response body is the function's output value.
/// Model request: `POST {endpoint}` with `{ "template", "variables", "tier",
/// "model" }`; the response body is `{ "completion": String }`.

use crate::config::TierModels;
use crate::error::CollaboratorError;
use crate::flow::types::ModelTier;
use crate::runtime::invoker::{FunctionInvoker, ModelInvoker};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Routes function identities to HTTP endpoints
#[derive(Debug, Clone)]
pub struct HttpFunctionInvoker {
    client: reqwest::Client,
    endpoints: HashMap<String, String>,
}

#[derive(Serialize)]
struct FunctionRequest<'a> {
    function: &'a str,
    input: Value,
}

impl HttpFunctionInvoker {
    pub fn new(endpoints: HashMap<String, String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
        }
    }

    pub fn endpoint_for(&self, function: &str) -> Option<&str> {
        self.endpoints.get(function).map(String::as_str)
    }
}

#[async_trait]
impl FunctionInvoker for HttpFunctionInvoker {
    async fn invoke(&self, function: &str, input: Value) -> Result<Value, CollaboratorError> {
        let url = self
            .endpoint_for(function)
            .ok_or_else(|| CollaboratorError::UnknownFunction(function.to_string()))?;

        tracing::debug!("🌍 Calling function '{}' at {}", function, url);

        let response = self
            .client
            .post(url)
            .json(&FunctionRequest { function, input })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::failed(format!(
                "function '{}' returned {}: {}",
                function, status, body
            )));
        }

        Ok(response.json::<Value>().await?)
    }
}

/// Calls a model gateway, mapping tiers to model identifiers
#[derive(Debug, Clone)]
pub struct HttpModelInvoker {
    client: reqwest::Client,
    endpoint: String,
    models: TierModels,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    template: &'a str,
    variables: &'a HashMap<String, Value>,
    tier: ModelTier,
    model: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    completion: String,
}

impl HttpModelInvoker {
    pub fn new(endpoint: impl Into<String>, models: TierModels) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            models,
        }
    }
}

#[async_trait]
impl ModelInvoker for HttpModelInvoker {
    async fn complete(
        &self,
        template: &str,
        variables: &HashMap<String, Value>,
        tier: ModelTier,
    ) -> Result<String, CollaboratorError> {
        let model = self.models.model_for(tier);
        tracing::debug!("🧠 Requesting completion for '{}' ({} → {})", template, tier, model);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&CompletionRequest {
                template,
                variables,
                tier,
                model,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::failed(format!(
                "model gateway returned {} for '{}': {}",
                status, template, body
            )));
        }

        let body: CompletionResponse = response.json().await?;
        Ok(body.completion)
    }
}
