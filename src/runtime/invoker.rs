/// Collaborator interfaces
///
/// The engine never performs Function or Model work itself. It calls out
/// through these two traits, which are injected at construction so tests and
/// deployments can swap in their own implementations.

use crate::error::CollaboratorError;
use crate::flow::types::ModelTier;
use async_trait::async_trait;
use serde_json::Value;
use std::{collections::HashMap, fmt, sync::Arc};

/// Runs an external function by identity
#[async_trait]
pub trait FunctionInvoker: Send + Sync {
    async fn invoke(&self, function: &str, input: Value) -> Result<Value, CollaboratorError>;
}

/// Produces a text completion for a prompt template
///
/// Template substitution is the collaborator's job; the engine only supplies
/// resolved variable bindings and passes the tier through untouched.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn complete(
        &self,
        template: &str,
        variables: &HashMap<String, Value>,
        tier: ModelTier,
    ) -> Result<String, CollaboratorError>;
}

/// Synchronous in-process function body
pub type FunctionHandler = Arc<dyn Fn(Value) -> Result<Value, CollaboratorError> + Send + Sync>;

/// Function identity → handler map
///
/// Identities without a local handler go to the fallback invoker when one is
/// configured, and fail with [`CollaboratorError::UnknownFunction`] otherwise.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    handlers: HashMap<String, FunctionHandler>,
    fallback: Option<Arc<dyn FunctionInvoker>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in marshaling functions
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::runtime::builtins::register_all(&mut registry);
        registry
    }

    /// Register a local handler, replacing any previous one with the same identity
    pub fn register<F>(&mut self, function: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Value) -> Result<Value, CollaboratorError> + Send + Sync + 'static,
    {
        self.handlers.insert(function.into(), Arc::new(handler));
        self
    }

    /// Route unknown identities to another invoker (typically the HTTP one)
    pub fn with_fallback(mut self, fallback: Arc<dyn FunctionInvoker>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn contains(&self, function: &str) -> bool {
        self.handlers.contains_key(function)
    }

    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.function_names())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[async_trait]
impl FunctionInvoker for FunctionRegistry {
    async fn invoke(&self, function: &str, input: Value) -> Result<Value, CollaboratorError> {
        if let Some(handler) = self.handlers.get(function) {
            tracing::debug!("🧩 Running local function '{}'", function);
            return handler(input);
        }
        match &self.fallback {
            Some(fallback) => fallback.invoke(function, input).await,
            None => Err(CollaboratorError::UnknownFunction(function.to_string())),
        }
    }
}

/// Model invoker used when no model endpoint is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredModel;

#[async_trait]
impl ModelInvoker for UnconfiguredModel {
    async fn complete(
        &self,
        template: &str,
        _variables: &HashMap<String, Value>,
        _tier: ModelTier,
    ) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::failed(format!(
            "no model endpoint configured for template '{}'",
            template
        )))
    }
}
