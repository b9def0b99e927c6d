/// Collaborator-backed node execution
///
/// Function and ModelPrompt nodes are the only nodes that leave the scheduler:
/// each becomes a [`NodeCall`] run on its own task. The executor bounds how
/// many calls are in flight and how long each may take; everything else about
/// the call is the collaborator's business.

use crate::config::EngineConfig;
use crate::error::CollaboratorError;
use crate::flow::types::{ModelTier, NodeDefinition, NodeKind};
use crate::runtime::invoker::{FunctionInvoker, ModelInvoker};
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::Semaphore;

/// A fully resolved collaborator call
#[derive(Debug, Clone, PartialEq)]
pub enum NodeCall {
    Function {
        function: String,
        input: Value,
    },
    Model {
        template: String,
        variables: HashMap<String, Value>,
        tier: ModelTier,
    },
}

impl NodeCall {
    /// Build the call for a Function or ModelPrompt node from its resolved inputs
    ///
    /// `inputs` are in port declaration order. A Function with a single input
    /// receives that value as-is; with several it receives an Object keyed by
    /// input name. Returns `None` for kinds the scheduler runs inline.
    pub fn for_node(node: &NodeDefinition, inputs: Vec<(String, Value)>) -> Option<Self> {
        match &node.kind {
            NodeKind::Function { function } => {
                let input = if inputs.len() == 1 {
                    inputs.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null)
                } else {
                    Value::Object(inputs.into_iter().collect::<Map<String, Value>>())
                };
                Some(Self::Function {
                    function: function.clone(),
                    input,
                })
            }
            NodeKind::ModelPrompt { template, tier } => Some(Self::Model {
                template: template.clone(),
                variables: inputs.into_iter().collect(),
                tier: *tier,
            }),
            _ => None,
        }
    }

    /// Identity of the collaborator this call goes to
    pub fn collaborator(&self) -> &str {
        match self {
            Self::Function { function, .. } => function,
            Self::Model { template, .. } => template,
        }
    }
}

/// Runs node calls against the injected collaborators
pub struct NodeExecutor {
    functions: Arc<dyn FunctionInvoker>,
    models: Arc<dyn ModelInvoker>,
    /// Shared across invocations so the limit protects the collaborators
    permits: Arc<Semaphore>,
    default_timeout: Duration,
}

impl std::fmt::Debug for NodeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeExecutor")
            .field("available_permits", &self.permits.available_permits())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

/// Waits for a concurrency slot at least this long are logged
const QUEUE_LOG_THRESHOLD: Duration = Duration::from_millis(10);

/// Result of one collaborator call plus how long it waited for a slot
#[derive(Debug)]
pub struct CallOutcome {
    pub queued: Duration,
    pub result: Result<Value, CollaboratorError>,
}

impl NodeExecutor {
    pub fn new(config: &EngineConfig, functions: Arc<dyn FunctionInvoker>, models: Arc<dyn ModelInvoker>) -> Self {
        Self {
            functions,
            models,
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            default_timeout: config.node_timeout(),
        }
    }

    /// Effective timeout for a node
    pub fn timeout_for(&self, node: &NodeDefinition) -> Duration {
        node.timeout_secs.map(Duration::from_secs).unwrap_or(self.default_timeout)
    }

    /// Run one call
    ///
    /// Waits for a concurrency slot first; the timeout covers only the
    /// collaborator call itself, and the wait is reported as `queued`.
    /// Dropping the returned future releases the slot.
    pub async fn execute(&self, call: NodeCall, timeout: Duration) -> CallOutcome {
        let waiting = Instant::now();
        let permit = self.permits.acquire().await;
        let queued = waiting.elapsed();

        let _permit = match permit {
            Ok(permit) => permit,
            Err(e) => {
                return CallOutcome {
                    queued,
                    result: Err(CollaboratorError::failed(format!("concurrency limiter closed: {}", e))),
                }
            }
        };
        if queued >= QUEUE_LOG_THRESHOLD {
            tracing::debug!("⏳ {} waited {:?} for a concurrency slot", call.collaborator(), queued);
        }

        let outcome = match call {
            NodeCall::Function { function, input } => {
                tokio::time::timeout(timeout, self.functions.invoke(&function, input)).await
            }
            NodeCall::Model {
                template,
                variables,
                tier,
            } => tokio::time::timeout(timeout, self.models.complete(&template, &variables, tier))
                .await
                .map(|completion| completion.map(Value::String)),
        };

        CallOutcome {
            queued,
            result: outcome.unwrap_or(Err(CollaboratorError::Timeout(timeout))),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::types::{ports, PayloadType};
    use crate::runtime::testing::{ScriptedFunctions, ScriptedModel};
    use serde_json::json;

    #[test]
    fn test_single_input_function_receives_value() {
        let node = NodeDefinition::function("f", "echo")
            .input(ports::FUNCTION_INPUT, PayloadType::String, None)
            .output(ports::FUNCTION_RESPONSE, PayloadType::String);
        let call = NodeCall::for_node(&node, vec![(ports::FUNCTION_INPUT.to_string(), json!("x"))]).unwrap();
        assert_eq!(
            call,
            NodeCall::Function {
                function: "echo".to_string(),
                input: json!("x")
            }
        );
    }

    #[test]
    fn test_multi_input_function_receives_object() {
        let node = NodeDefinition::function("f", "join")
            .input("a", PayloadType::String, None)
            .input("b", PayloadType::Number, None)
            .output(ports::FUNCTION_RESPONSE, PayloadType::String);
        let call = NodeCall::for_node(&node, vec![("a".to_string(), json!("x")), ("b".to_string(), json!(2))]).unwrap();
        assert_eq!(call.collaborator(), "join");
        assert!(matches!(call, NodeCall::Function { input, .. } if input == json!({ "a": "x", "b": 2 })));
    }

    #[test]
    fn test_inline_kinds_have_no_call() {
        assert!(NodeCall::for_node(&NodeDefinition::input_node("in"), Vec::new()).is_none());
    }

    #[tokio::test]
    async fn test_timeout_and_node_override() {
        let functions = ScriptedFunctions::new().respond_after("slow", Duration::from_millis(200), |_| Ok(json!(1)));
        let executor = NodeExecutor::new(
            &EngineConfig {
                max_concurrency: 2,
                node_timeout_secs: 30,
            },
            Arc::new(functions),
            Arc::new(ScriptedModel::new()),
        );

        let node = NodeDefinition::function("f", "slow").with_timeout_secs(5);
        assert_eq!(executor.timeout_for(&node), Duration::from_secs(5));
        assert_eq!(
            executor.timeout_for(&NodeDefinition::function("g", "slow")),
            Duration::from_secs(30)
        );

        let call = NodeCall::Function {
            function: "slow".to_string(),
            input: json!(null),
        };
        let err = executor.execute(call, Duration::from_millis(20)).await.result.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(executor.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_model_completion_becomes_string() {
        let model = ScriptedModel::new().respond("t", |vars, tier| Ok(format!("{}:{}", vars["q"], tier)));
        let executor = NodeExecutor::new(
            &EngineConfig::default(),
            Arc::new(ScriptedFunctions::new()),
            Arc::new(model),
        );
        let call = NodeCall::Model {
            template: "t".to_string(),
            variables: HashMap::from([("q".to_string(), json!("x"))]),
            tier: ModelTier::Fast,
        };
        assert_eq!(
            executor.execute(call, Duration::from_secs(1)).await.result.unwrap(),
            json!("\"x\":fast")
        );
    }

    #[tokio::test]
    async fn test_queue_wait_is_reported_and_not_timed() {
        let functions = ScriptedFunctions::new().respond_after("slow", Duration::from_millis(100), |_| Ok(json!(1)));
        let executor = NodeExecutor::new(
            &EngineConfig {
                max_concurrency: 1,
                node_timeout_secs: 30,
            },
            Arc::new(functions),
            Arc::new(ScriptedModel::new()),
        );
        let call = || NodeCall::Function {
            function: "slow".to_string(),
            input: json!(null),
        };

        // the second call queues behind the first for longer than its own timeout
        let (first, second) = tokio::join!(
            executor.execute(call(), Duration::from_millis(150)),
            executor.execute(call(), Duration::from_millis(150)),
        );
        let (mut queued, mut results) = (vec![first.queued, second.queued], vec![first.result, second.result]);
        queued.sort();
        results.retain(|r| r.is_ok());

        assert_eq!(results.len(), 2);
        assert!(queued[0] < QUEUE_LOG_THRESHOLD);
        assert!(queued[1] >= Duration::from_millis(80));
    }
}
