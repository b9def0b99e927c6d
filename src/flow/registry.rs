/// Hot-reload flow registry using ArcSwap
///
/// Holds every stored flow in its compiled (validated) form. Each update swaps
/// the whole map pointer, so invocations that already hold a [`CompiledFlow`]
/// keep running against the graph they started with.

use crate::flow::{
    graph::FlowGraph,
    storage::FlowStorage,
    types::FlowDefinition,
    validation::{validate, FlowLayout, ValidationError},
};
use anyhow::Result;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// A flow that passed validation, ready to be invoked any number of times
#[derive(Debug, Clone)]
pub struct CompiledFlow {
    pub graph: Arc<FlowGraph>,
    pub layout: Arc<FlowLayout>,
}

impl CompiledFlow {
    /// Build and validate a definition
    pub fn compile(definition: FlowDefinition) -> Result<Self, ValidationError> {
        let graph = FlowGraph::new(definition)?;
        let layout = validate(&graph)?;
        Ok(Self {
            graph: Arc::new(graph),
            layout: Arc::new(layout),
        })
    }

    pub fn id(&self) -> &str {
        self.graph.id()
    }

    pub fn definition(&self) -> &FlowDefinition {
        self.graph.definition()
    }
}

/// Lock-free flow registry
///
/// Invalid definitions never enter the map.
#[derive(Debug)]
pub struct FlowRegistry {
    /// Key: flow id, Value: compiled flow
    flows: ArcSwap<HashMap<String, CompiledFlow>>,

    /// Persistent storage for reload operations
    storage: FlowStorage,
}

impl FlowRegistry {
    pub fn new(storage: FlowStorage) -> Self {
        Self {
            flows: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    pub fn storage(&self) -> &FlowStorage {
        &self.storage
    }

    /// Populate the registry from storage
    ///
    /// Stored definitions that no longer validate are skipped with a warning
    /// rather than failing startup.
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored = self.storage.load_all_flows().await?;
        let mut compiled = HashMap::with_capacity(stored.len());

        for (id, definition) in stored {
            match CompiledFlow::compile(definition) {
                Ok(flow) => {
                    compiled.insert(id, flow);
                }
                Err(e) => tracing::warn!("⚠️ Skipping stored flow '{}': {}", id, e),
            }
        }

        self.flows.store(Arc::new(compiled));
        tracing::info!("📚 Initialized flow registry with {} flows", self.flows.load().len());

        Ok(())
    }

    /// Reload a single flow from storage
    pub async fn reload_flow(&self, flow_id: &str) -> Result<()> {
        let definition = self
            .storage
            .get_flow(flow_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Flow not found: {}", flow_id))?;

        self.register(CompiledFlow::compile(definition)?);
        tracing::info!("🔄 Hot-reloaded flow: {}", flow_id);

        Ok(())
    }

    /// Insert or replace a compiled flow
    pub fn register(&self, flow: CompiledFlow) {
        self.flows.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(flow.id().to_string(), flow.clone());
            next
        });
    }

    /// Get a flow by id (lock-free read)
    pub fn get_flow(&self, flow_id: &str) -> Option<CompiledFlow> {
        self.flows.load().get(flow_id).cloned()
    }

    /// Active flow ids, sorted
    pub fn list_flow_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.flows.load().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove a flow; returns whether it was present
    pub fn remove_flow(&self, flow_id: &str) -> bool {
        let current = self.flows.load();
        if !current.contains_key(flow_id) {
            return false;
        }

        self.flows.rcu(|current| {
            let mut next = (**current).clone();
            next.remove(flow_id);
            next
        });
        tracing::info!("🗑️ Removed flow from registry: {}", flow_id);
        true
    }
}
