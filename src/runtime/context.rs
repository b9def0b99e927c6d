/// Per-invocation execution state
///
/// Owned by the scheduler loop and only ever touched from it. Holds the
/// write-once output values of every node instance, which instances have been
/// started, the branch count of each fan-out region and the per-branch
/// accumulators of each Collector.

use crate::error::{FlowError, FlowResult};
use crate::flow::graph::FlowGraph;
use crate::flow::path;
use crate::flow::types::{ports, Connection, InputPort, NodeKind, PayloadType};
use crate::flow::validation::FlowLayout;
use petgraph::graph::NodeIndex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

/// One execution of a node: unscoped, or scoped to one branch of its region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instance {
    pub node: NodeIndex,
    pub branch: Option<usize>,
}

impl Instance {
    pub fn unscoped(node: NodeIndex) -> Self {
        Self { node, branch: None }
    }

    pub fn scoped(node: NodeIndex, branch: usize) -> Self {
        Self {
            node,
            branch: Some(branch),
        }
    }
}

/// Branch results received by a Collector, keyed by branch index
#[derive(Debug, Default)]
struct Accumulator {
    expected: Option<usize>,
    items: BTreeMap<usize, Value>,
    emitted: bool,
}

impl Accumulator {
    fn is_complete(&self) -> bool {
        !self.emitted && self.expected == Some(self.items.len())
    }
}

#[derive(Debug)]
pub struct InvocationState<'a> {
    graph: &'a FlowGraph,
    layout: &'a FlowLayout,
    values: HashMap<Instance, HashMap<String, Value>>,
    started: HashSet<Instance>,
    /// Region position → number of branches
    region_sizes: HashMap<usize, usize>,
    collectors: HashMap<NodeIndex, Accumulator>,
}

impl<'a> InvocationState<'a> {
    pub fn new(graph: &'a FlowGraph, layout: &'a FlowLayout) -> Self {
        Self {
            graph,
            layout,
            values: HashMap::new(),
            started: HashSet::new(),
            region_sizes: HashMap::new(),
            collectors: HashMap::new(),
        }
    }

    /// The Input node plus any unscoped node that has no inputs at all
    pub fn initial_ready(&self) -> Vec<Instance> {
        let mut ready = vec![Instance::unscoped(self.layout.input)];
        ready.extend(
            self.layout
                .order
                .iter()
                .copied()
                .filter(|&n| n != self.layout.input && self.layout.region_of(n).is_none())
                .filter(|&n| self.graph.node(n).inputs.is_empty())
                .map(Instance::unscoped),
        );
        ready
    }

    /// Record that an instance is starting; false if it already started
    pub fn mark_started(&mut self, instance: Instance) -> bool {
        self.started.insert(instance)
    }

    /// Instance whose output feeds `target` through a connection from `source`
    ///
    /// Inside a region, values from other members and the Iterator's items are
    /// read from the same branch; everything else is read unscoped.
    fn source_instance(&self, target: Instance, source: NodeIndex, source_output: &str) -> Instance {
        let branch = match (target.branch, self.layout.region_of(target.node)) {
            (Some(branch), Some(region)) => {
                let region = &self.layout.regions[region];
                let scoped = region.members.contains(&source)
                    || (source == region.iterator && source_output == ports::ARRAY_ITEM);
                scoped.then_some(branch)
            }
            _ => None,
        };
        Instance { node: source, branch }
    }

    fn raw_input(&self, instance: Instance, port: &str) -> Option<(&'a Connection, &Value)> {
        let (source, connection) = self.graph.feeding(instance.node, port)?;
        let source_instance = self.source_instance(instance, source, &connection.source_output);
        self.values
            .get(&source_instance)
            .and_then(|outputs| outputs.get(&connection.source_output))
            .map(|value| (connection, value))
    }

    /// Not yet started and every declared input has a value
    pub fn is_ready(&self, instance: Instance) -> bool {
        !self.started.contains(&instance)
            && self
                .graph
                .node(instance.node)
                .inputs
                .iter()
                .all(|port| self.raw_input(instance, &port.name).is_some())
    }

    /// Apply a connection's path to a source value and check the port type
    fn extract_for(
        &self,
        node: NodeIndex,
        branch: Option<usize>,
        port: &InputPort,
        connection: &Connection,
        raw: &Value,
    ) -> FlowResult<Value> {
        let definition = self.graph.node(node);
        let path_expr = self.graph.effective_path(connection);
        let failure = |reason: String| FlowError::Extraction {
            node: definition.name.clone(),
            kind: definition.kind.label(),
            branch,
            port: port.name.clone(),
            path: path_expr.to_string(),
            reason,
        };

        let value = path::extract(raw, path_expr).map_err(|e| failure(e.to_string()))?;
        match PayloadType::of(&value) {
            Some(found) if found == port.payload_type => Ok(value),
            Some(found) => Err(failure(format!("expected {}, found {}", port.payload_type, found))),
            None => Err(failure(format!("expected {}, found {}", port.payload_type, value))),
        }
    }

    /// Resolved input values in port declaration order
    pub fn gather_inputs(&self, instance: Instance) -> FlowResult<Vec<(String, Value)>> {
        let node = self.graph.node(instance.node);
        node.inputs
            .iter()
            .map(|port| {
                let (connection, raw) = self.raw_input(instance, &port.name).ok_or_else(|| FlowError::Extraction {
                    node: node.name.clone(),
                    kind: node.kind.label(),
                    branch: instance.branch,
                    port: port.name.clone(),
                    path: String::new(),
                    reason: "no value available for input".to_string(),
                })?;
                let value = self.extract_for(instance.node, instance.branch, port, connection, raw)?;
                Ok((port.name.clone(), value))
            })
            .collect()
    }

    /// Publish a node's single output value
    pub fn publish_single(&mut self, instance: Instance, value: Value) -> FlowResult<Vec<Instance>> {
        let graph = self.graph;
        match graph.node(instance.node).outputs.first() {
            Some(port) => self.publish(instance, &port.name, value),
            None => Ok(Vec::new()),
        }
    }

    /// Fan out an Iterator's array: the size first, then one item per branch
    pub fn run_iterator(&mut self, instance: Instance) -> FlowResult<Vec<Instance>> {
        let node = self.graph.node(instance.node);
        let items = match self.gather_inputs(instance)?.into_iter().next() {
            Some((_, Value::Array(items))) => items,
            _ => Vec::new(),
        };

        if let Some(region) = self.layout.region_opened_by(instance.node) {
            self.region_sizes.insert(region, items.len());
        }
        tracing::debug!("🔀 Iterator '{}' fanning out {} branches", node.name, items.len());

        let mut ready = self.publish(instance, ports::ARRAY_SIZE, json!(items.len()))?;
        for (branch, item) in items.into_iter().enumerate() {
            ready.extend(self.publish(Instance::scoped(instance.node, branch), ports::ARRAY_ITEM, item)?);
        }
        Ok(ready)
    }

    /// The value delivered to the Output node
    pub fn resolve_output(&self, instance: Instance) -> FlowResult<Value> {
        let mut inputs = self.gather_inputs(instance)?;
        Ok(inputs.pop().map(|(_, value)| value).unwrap_or(Value::Null))
    }

    /// Store an output value and return the instances it made ready
    pub fn publish(&mut self, instance: Instance, port: &str, value: Value) -> FlowResult<Vec<Instance>> {
        let graph = self.graph;
        let mut candidates = Vec::new();
        let mut completed = Vec::new();

        for (target, connection) in graph.outgoing_from(instance.node, port) {
            if matches!(graph.node(target).kind, NodeKind::Collector) {
                if self.collect(instance, target, connection, &value)? {
                    completed.push(target);
                }
                continue;
            }

            match (self.layout.region_of(target), instance.branch) {
                (Some(_), Some(branch)) => candidates.push(Instance::scoped(target, branch)),
                (Some(region), None) => {
                    let branches = self.region_sizes.get(&region).copied().unwrap_or(0);
                    candidates.extend((0..branches).map(|b| Instance::scoped(target, b)));
                }
                (None, _) => candidates.push(Instance::unscoped(target)),
            }
        }

        self.values.entry(instance).or_default().insert(port.to_string(), value);

        let mut ready: Vec<Instance> = candidates.into_iter().filter(|&c| self.is_ready(c)).collect();
        for collector in completed {
            ready.extend(self.emit_collected(collector)?);
        }
        Ok(ready)
    }

    /// Feed one value into a Collector; true once it holds every branch
    fn collect(
        &mut self,
        from: Instance,
        collector: NodeIndex,
        connection: &Connection,
        value: &Value,
    ) -> FlowResult<bool> {
        let graph = self.graph;
        let node = graph.node(collector);
        let Some(port) = node.find_input(&connection.target_input) else {
            return Ok(false);
        };
        let extracted = self.extract_for(collector, from.branch, port, connection, value)?;

        let invalid = |reason: &str| FlowError::Extraction {
            node: node.name.clone(),
            kind: node.kind.label(),
            branch: from.branch,
            port: port.name.clone(),
            path: graph.effective_path(connection).to_string(),
            reason: reason.to_string(),
        };

        let slots = self.collectors.entry(collector).or_default();
        match port.name.as_str() {
            ports::ARRAY_ITEM => {
                let branch = from.branch.ok_or_else(|| invalid("item arrived outside a fan-out branch"))?;
                slots.items.insert(branch, extracted);
            }
            ports::ARRAY_SIZE => {
                let size = extracted
                    .as_u64()
                    .ok_or_else(|| invalid("array size is not a non-negative integer"))?;
                slots.expected = Some(size as usize);
            }
            _ => {}
        }
        Ok(slots.is_complete())
    }

    /// Publish a completed Collector's array in branch-index order
    fn emit_collected(&mut self, collector: NodeIndex) -> FlowResult<Vec<Instance>> {
        let Some(slots) = self.collectors.get_mut(&collector) else {
            return Ok(Vec::new());
        };
        slots.emitted = true;
        let items: Vec<Value> = std::mem::take(&mut slots.items).into_values().collect();

        tracing::debug!(
            "📦 Collector '{}' assembled {} branch results",
            self.graph.node(collector).name,
            items.len()
        );

        let instance = Instance::unscoped(collector);
        self.started.insert(instance);
        self.publish(instance, ports::COLLECTED_ARRAY, Value::Array(items))
    }

    /// Nodes that never produced a value, in topological order
    ///
    /// Members of regions that fanned out to zero branches are not counted.
    pub fn unresolved(&self) -> Vec<String> {
        self.layout
            .order
            .iter()
            .copied()
            .filter(|&n| !self.values.keys().any(|i| i.node == n))
            .filter(|&n| {
                self.layout
                    .region_of(n)
                    .and_then(|r| self.region_sizes.get(&r))
                    .map_or(true, |&size| size > 0)
            })
            .map(|n| self.graph.node(n).name.clone())
            .collect()
    }
}
