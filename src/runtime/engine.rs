/// Flow scheduler
///
/// Drives one invocation from the Input node to the Output node. The loop owns
/// all invocation state; Function and ModelPrompt nodes run as tokio tasks and
/// report back through a `JoinSet`, while Input, Iterator, Collector and Output
/// nodes are handled inline. The first failure cancels everything still in
/// flight.

use crate::config::EngineConfig;
use crate::error::{CollaboratorError, FlowError, FlowResult};
use crate::flow::registry::CompiledFlow;
use crate::flow::types::NodeKind;
use crate::runtime::context::{Instance, InvocationState};
use crate::runtime::executor::{CallOutcome, NodeCall, NodeExecutor};
use crate::runtime::invoker::{FunctionInvoker, ModelInvoker};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Outcome of a successful invocation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    pub invocation_id: Uuid,
    pub output: Value,
    #[serde(serialize_with = "serialize_millis", rename = "elapsedMs")]
    pub elapsed: Duration,
    /// Function and Model calls started during the invocation
    pub collaborator_calls: usize,
}

fn serialize_millis<S: serde::Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(elapsed.as_millis() as u64)
}

type TaskReport = (Instance, Duration, CallOutcome);

/// Concurrent flow execution engine
#[derive(Debug, Clone)]
pub struct FlowEngine {
    executor: Arc<NodeExecutor>,
}

impl FlowEngine {
    pub fn new(config: &EngineConfig, functions: Arc<dyn FunctionInvoker>, models: Arc<dyn ModelInvoker>) -> Self {
        tracing::info!(
            "⚙️ Flow engine ready (max {} concurrent calls, {}s default timeout)",
            config.max_concurrency,
            config.node_timeout_secs
        );
        Self {
            executor: Arc::new(NodeExecutor::new(config, functions, models)),
        }
    }

    pub fn executor(&self) -> &NodeExecutor {
        &self.executor
    }

    /// Run a compiled flow on one input document
    pub async fn invoke(&self, flow: &CompiledFlow, input: Value) -> FlowResult<InvocationResult> {
        self.invoke_with_cancel(flow, input, CancellationToken::new()).await
    }

    /// Run a compiled flow, aborting when `cancel` fires
    ///
    /// Cancelling drops every in-flight collaborator call and releases its
    /// concurrency slot.
    pub async fn invoke_with_cancel(
        &self,
        flow: &CompiledFlow,
        input: Value,
        cancel: CancellationToken,
    ) -> FlowResult<InvocationResult> {
        let invocation_id = Uuid::new_v4();
        let started = Instant::now();
        tracing::info!("🚀 Invocation {} of flow '{}' started", invocation_id, flow.id());

        let outcome = self.run(flow, input, &cancel).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok((output, collaborator_calls)) => {
                tracing::info!(
                    "🎉 Invocation {} of flow '{}' completed in {:?} ({} collaborator calls)",
                    invocation_id,
                    flow.id(),
                    elapsed,
                    collaborator_calls
                );
                Ok(InvocationResult {
                    invocation_id,
                    output,
                    elapsed,
                    collaborator_calls,
                })
            }
            Err(e) => {
                tracing::error!("❌ Invocation {} of flow '{}' failed after {:?}: {}", invocation_id, flow.id(), elapsed, e);
                Err(e)
            }
        }
    }

    async fn run(&self, flow: &CompiledFlow, input: Value, cancel: &CancellationToken) -> FlowResult<(Value, usize)> {
        if !input.is_object() {
            return Err(FlowError::InvalidInput(format!("expected a JSON object, got {}", input)));
        }

        let graph = flow.graph.as_ref();
        let mut state = InvocationState::new(graph, flow.layout.as_ref());
        let mut ready: VecDeque<Instance> = state.initial_ready().into();
        let mut tasks: JoinSet<TaskReport> = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, Instance> = HashMap::new();
        let mut document = Some(input);
        let mut calls = 0usize;

        loop {
            while let Some(instance) = ready.pop_front() {
                if !state.mark_started(instance) {
                    continue;
                }
                let node = graph.node(instance.node);

                match &node.kind {
                    NodeKind::Input => {
                        let value = document.take().unwrap_or(Value::Null);
                        ready.extend(state.publish_single(instance, value)?);
                    }
                    NodeKind::Iterator { .. } => {
                        ready.extend(state.run_iterator(instance)?);
                    }
                    NodeKind::Output => {
                        let output = state.resolve_output(instance)?;
                        if !tasks.is_empty() {
                            tracing::debug!("🧹 Output reached; aborting {} unrelated tasks", tasks.len());
                            tasks.abort_all();
                        }
                        return Ok((output, calls));
                    }
                    // published by the Collector's accumulator, never scheduled directly
                    NodeKind::Collector => {}
                    NodeKind::Function { .. } | NodeKind::ModelPrompt { .. } => {
                        let inputs = state.gather_inputs(instance)?;
                        let Some(call) = NodeCall::for_node(node, inputs) else {
                            continue;
                        };
                        let timeout = self.executor.timeout_for(node);
                        let executor = Arc::clone(&self.executor);

                        tracing::debug!(
                            "▶️ Starting {} '{}'{} → {}",
                            node.kind.label(),
                            node.name,
                            branch_label(instance.branch),
                            call.collaborator()
                        );

                        calls += 1;
                        let handle = tasks.spawn(async move {
                            let started = Instant::now();
                            let outcome = executor.execute(call, timeout).await;
                            (instance, started.elapsed(), outcome)
                        });
                        running.insert(handle.id(), instance);
                    }
                }
            }

            if tasks.is_empty() {
                let unresolved = state.unresolved();
                tracing::error!(
                    "🧱 Flow '{}' stalled with nothing running; unresolved nodes: {:?}",
                    flow.id(),
                    unresolved
                );
                return Err(FlowError::StuckGraph { unresolved });
            }

            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!("🛑 Invocation cancelled with {} tasks in flight", tasks.len());
                    tasks.abort_all();
                    return Err(FlowError::Cancelled);
                }
                joined = tasks.join_next_with_id() => joined,
            };

            let (instance, result) = match joined {
                Some(Ok((id, (instance, elapsed, CallOutcome { queued, result })))) => {
                    running.remove(&id);
                    let node = graph.node(instance.node);
                    match &result {
                        Ok(_) => tracing::debug!(
                            "✅ {} '{}'{} completed in {:?} (queued {:?})",
                            node.kind.label(),
                            node.name,
                            branch_label(instance.branch),
                            elapsed,
                            queued
                        ),
                        Err(e) => tracing::warn!(
                            "⚠️ {} '{}'{} failed after {:?} (queued {:?}): {}",
                            node.kind.label(),
                            node.name,
                            branch_label(instance.branch),
                            elapsed,
                            queued,
                            e
                        ),
                    }
                    (instance, result)
                }
                Some(Err(join_error)) => {
                    let Some(instance) = running.remove(&join_error.id()) else {
                        tasks.abort_all();
                        return Err(FlowError::StuckGraph {
                            unresolved: state.unresolved(),
                        });
                    };
                    (instance, Err(CollaboratorError::failed(format!("node task failed: {}", join_error))))
                }
                None => continue,
            };

            match result {
                Ok(value) => ready.extend(state.publish_single(instance, value)?),
                Err(source) => {
                    tasks.abort_all();
                    let node = graph.node(instance.node);
                    let collaborator = match &node.kind {
                        NodeKind::Function { function } => function.clone(),
                        NodeKind::ModelPrompt { template, .. } => template.clone(),
                        _ => node.name.clone(),
                    };
                    return Err(FlowError::Collaborator {
                        node: node.name.clone(),
                        kind: node.kind.label(),
                        branch: instance.branch,
                        collaborator,
                        source,
                    });
                }
            }
        }
    }
}

fn branch_label(branch: Option<usize>) -> String {
    branch.map(|b| format!(" [branch {}]", b)).unwrap_or_default()
}
