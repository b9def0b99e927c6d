/// Structural validation of flow graphs
///
/// `validate` is a pure check over a [`FlowGraph`]. It stops at the first
/// violation and, on success, returns the [`FlowLayout`] the scheduler runs
/// from: the Input/Output nodes, a topological order and the explicit
/// Iterator/Collector fan-out regions.

use crate::flow::graph::FlowGraph;
use crate::flow::path;
use crate::flow::types::{ports, NodeDefinition, NodeKind, PayloadType};
use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use thiserror::Error;

/// First structural violation found in a flow definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("duplicate node name '{node}'")]
    DuplicateNode { node: String },

    #[error("connection references unknown node '{node}'")]
    UnknownNode { node: String },

    #[error("connection references undeclared port '{port}' on node '{node}'")]
    UnknownPort { node: String, port: String },

    #[error("flow must have exactly one Input node, found {count}")]
    InputNodeCount { count: usize },

    #[error("flow must have exactly one Output node, found {count}")]
    OutputNodeCount { count: usize },

    #[error("node '{node}' has invalid ports: {reason}")]
    InvalidPorts { node: String, reason: String },

    #[error("expression '{expression}' on '{node}.{port}' must be rooted at $.data")]
    InvalidExpression {
        node: String,
        port: String,
        expression: String,
    },

    #[error("input '{port}' on node '{node}' is not connected")]
    UnconnectedInput { node: String, port: String },

    #[error("input '{port}' on node '{node}' is fed by {count} connections")]
    MultiplyConnectedInput { node: String, port: String, count: usize },

    #[error("connection {connection} carries {found} but {expected} is required")]
    TypeMismatch {
        connection: String,
        expected: PayloadType,
        found: PayloadType,
    },

    #[error("cycle detected through node '{node}'")]
    CycleDetected { node: String },

    #[error("iterator '{iterator}' names '{collector}', which is not a Collector")]
    UnpairedIterator { iterator: String, collector: String },

    #[error("collector '{collector}' is not paired with exactly one Iterator (found {count})")]
    UnpairedCollector { collector: String, count: usize },

    #[error("fan-out regions may not nest or overlap: '{node}' is reachable from iterator '{iterator}'")]
    NestedFanOut { iterator: String, node: String },

    #[error("branch values of iterator '{iterator}' reach '{node}' without passing through collector '{collector}'")]
    RegionLeak {
        iterator: String,
        collector: String,
        node: String,
    },

    #[error("collector '{collector}' must take arrayItem from the region of '{iterator}' and arraySize from '{iterator}'")]
    CollectorWiring { collector: String, iterator: String },
}

/// One Iterator → ... → Collector region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutRegion {
    pub iterator: NodeIndex,
    pub collector: NodeIndex,
    /// Nodes executed once per branch (excludes both endpoints)
    pub members: BTreeSet<NodeIndex>,
}

/// Everything the scheduler needs, computed once per definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowLayout {
    pub input: NodeIndex,
    pub output: NodeIndex,
    pub order: Vec<NodeIndex>,
    pub regions: Vec<FanOutRegion>,
}

impl FlowLayout {
    /// Region a node is executed in, if any
    pub fn region_of(&self, node: NodeIndex) -> Option<usize> {
        self.regions.iter().position(|r| r.members.contains(&node))
    }

    /// Region opened by an Iterator
    pub fn region_opened_by(&self, iterator: NodeIndex) -> Option<usize> {
        self.regions.iter().position(|r| r.iterator == iterator)
    }
}

/// Validate a flow graph
///
/// Checks, in order: per-kind port shapes and expressions, a single Input and
/// Output node, one connection per input port, connection types, acyclicity,
/// and Iterator/Collector pairing with closed fan-out regions.
pub fn validate(graph: &FlowGraph) -> Result<FlowLayout, ValidationError> {
    for index in graph.node_indices() {
        validate_node_ports(graph.node(index))?;
    }

    let input = single_node_of_kind(graph, |k| matches!(k, NodeKind::Input))
        .map_err(|count| ValidationError::InputNodeCount { count })?;
    let output = single_node_of_kind(graph, |k| matches!(k, NodeKind::Output))
        .map_err(|count| ValidationError::OutputNodeCount { count })?;

    validate_input_arity(graph)?;
    validate_connection_types(graph)?;

    let order = toposort(graph.graph(), None).map_err(|cycle| ValidationError::CycleDetected {
        node: graph.node(cycle.node_id()).name.clone(),
    })?;

    let regions = build_regions(graph)?;

    tracing::debug!(
        "✅ Flow '{}' validated: {} nodes, {} fan-out regions",
        graph.id(),
        order.len(),
        regions.len()
    );

    Ok(FlowLayout {
        input,
        output,
        order,
        regions,
    })
}

fn invalid_ports(node: &NodeDefinition, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidPorts {
        node: node.name.clone(),
        reason: reason.into(),
    }
}

fn has_port(ports: &[(String, PayloadType)], name: &str, payload_type: PayloadType) -> bool {
    ports.iter().any(|(n, t)| n == name && *t == payload_type)
}

/// Per-kind port shape rules
fn validate_node_ports(node: &NodeDefinition) -> Result<(), ValidationError> {
    let inputs: Vec<(String, PayloadType)> = node.inputs.iter().map(|p| (p.name.clone(), p.payload_type)).collect();
    let outputs: Vec<(String, PayloadType)> = node.outputs.iter().map(|p| (p.name.clone(), p.payload_type)).collect();

    match &node.kind {
        NodeKind::Input => {
            if !inputs.is_empty() {
                return Err(invalid_ports(node, "Input nodes take no inputs"));
            }
            if outputs.len() != 1 || outputs[0].1 != PayloadType::Object {
                return Err(invalid_ports(node, "Input nodes publish exactly one Object output"));
            }
        }
        NodeKind::Output => {
            if inputs.len() != 1 || !outputs.is_empty() {
                return Err(invalid_ports(node, "Output nodes take exactly one input and publish nothing"));
            }
        }
        NodeKind::Function { .. } => {
            if inputs.is_empty() || outputs.len() != 1 {
                return Err(invalid_ports(node, "Function nodes need at least one input and exactly one output"));
            }
        }
        NodeKind::ModelPrompt { .. } => {
            if outputs.len() != 1 || outputs[0].1 != PayloadType::String {
                return Err(invalid_ports(node, "ModelPrompt nodes publish exactly one String output"));
            }
        }
        NodeKind::Iterator { .. } => {
            if inputs.len() != 1 || !has_port(&inputs, ports::ARRAY, PayloadType::Array) {
                return Err(invalid_ports(node, "Iterator nodes take a single Array input named 'array'"));
            }
            if outputs.len() != 2
                || !outputs.iter().any(|(n, _)| n == ports::ARRAY_ITEM)
                || !has_port(&outputs, ports::ARRAY_SIZE, PayloadType::Number)
            {
                return Err(invalid_ports(node, "Iterator nodes publish 'arrayItem' and a Number 'arraySize'"));
            }
        }
        NodeKind::Collector => {
            if inputs.len() != 2
                || !inputs.iter().any(|(n, _)| n == ports::ARRAY_ITEM)
                || !has_port(&inputs, ports::ARRAY_SIZE, PayloadType::Number)
            {
                return Err(invalid_ports(node, "Collector nodes take 'arrayItem' and a Number 'arraySize'"));
            }
            if outputs.len() != 1 || !has_port(&outputs, ports::COLLECTED_ARRAY, PayloadType::Array) {
                return Err(invalid_ports(node, "Collector nodes publish a single Array named 'collectedArray'"));
            }
        }
    }

    let mut seen = BTreeSet::new();
    for name in inputs.iter().map(|(n, _)| n) {
        if !seen.insert(name) {
            return Err(invalid_ports(node, format!("input '{}' declared twice", name)));
        }
    }
    let mut seen = BTreeSet::new();
    for name in outputs.iter().map(|(n, _)| n) {
        if !seen.insert(name) {
            return Err(invalid_ports(node, format!("output '{}' declared twice", name)));
        }
    }

    for port in &node.inputs {
        if let Some(expression) = &port.expression {
            if !path::is_rooted(expression) {
                return Err(ValidationError::InvalidExpression {
                    node: node.name.clone(),
                    port: port.name.clone(),
                    expression: expression.clone(),
                });
            }
        }
    }

    Ok(())
}

fn single_node_of_kind(graph: &FlowGraph, is_kind: impl Fn(&NodeKind) -> bool) -> Result<NodeIndex, usize> {
    let matching: Vec<NodeIndex> = graph.node_indices().filter(|&i| is_kind(&graph.node(i).kind)).collect();
    match matching.as_slice() {
        [single] => Ok(*single),
        other => Err(other.len()),
    }
}

/// Every input port is fed by exactly one connection
fn validate_input_arity(graph: &FlowGraph) -> Result<(), ValidationError> {
    for index in graph.node_indices() {
        let node = graph.node(index);
        for port in &node.inputs {
            let count = graph.incoming(index).filter(|(_, c)| c.target_input == port.name).count();
            match count {
                1 => {}
                0 => {
                    return Err(ValidationError::UnconnectedInput {
                        node: node.name.clone(),
                        port: port.name.clone(),
                    })
                }
                count => {
                    return Err(ValidationError::MultiplyConnectedInput {
                        node: node.name.clone(),
                        port: port.name.clone(),
                        count,
                    })
                }
            }
        }
    }
    Ok(())
}

/// Connection types agree with the target port and are reachable from the source port
fn validate_connection_types(graph: &FlowGraph) -> Result<(), ValidationError> {
    for connection in &graph.definition().connections {
        let label = format!(
            "{}.{} -> {}.{}",
            connection.source, connection.source_output, connection.target, connection.target_input
        );
        let mismatch = |expected, found| ValidationError::TypeMismatch {
            connection: label.clone(),
            expected,
            found,
        };

        let (Some(source), Some(target)) = (graph.index_of(&connection.source), graph.index_of(&connection.target))
        else {
            return Err(ValidationError::UnknownNode {
                node: connection.source.clone(),
            });
        };
        let (Some(source_port), Some(target_port)) = (
            graph.node(source).find_output(&connection.source_output),
            graph.node(target).find_input(&connection.target_input),
        ) else {
            return Err(ValidationError::UnknownPort {
                node: connection.target.clone(),
                port: connection.target_input.clone(),
            });
        };

        if connection.payload_type != target_port.payload_type {
            return Err(mismatch(target_port.payload_type, connection.payload_type));
        }

        let path = graph.effective_path(connection);
        if !path::is_rooted(path) {
            return Err(ValidationError::InvalidExpression {
                node: connection.target.clone(),
                port: connection.target_input.clone(),
                expression: path.to_string(),
            });
        }

        if path::is_identity(path) {
            if source_port.payload_type != connection.payload_type {
                return Err(mismatch(connection.payload_type, source_port.payload_type));
            }
        } else {
            if !source_port.payload_type.is_container() {
                // only Objects and Arrays can be indexed into
                return Err(mismatch(PayloadType::Object, source_port.payload_type));
            }
            if path::is_projection(path) && connection.payload_type != PayloadType::Array {
                return Err(mismatch(PayloadType::Array, connection.payload_type));
            }
        }
    }
    Ok(())
}

/// Pair Iterators with Collectors and compute the closed region between them
fn build_regions(graph: &FlowGraph) -> Result<Vec<FanOutRegion>, ValidationError> {
    let mut claims: HashMap<NodeIndex, usize> = HashMap::new();
    let mut owner: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut regions = Vec::new();

    for iterator in graph.node_indices() {
        let NodeKind::Iterator { collector: collector_name } = &graph.node(iterator).kind else {
            continue;
        };
        let iterator_name = &graph.node(iterator).name;

        let collector = graph
            .index_of(collector_name)
            .filter(|&c| matches!(graph.node(c).kind, NodeKind::Collector))
            .ok_or_else(|| ValidationError::UnpairedIterator {
                iterator: iterator_name.clone(),
                collector: collector_name.clone(),
            })?;
        *claims.entry(collector).or_insert(0) += 1;

        let mut members = BTreeSet::new();
        let mut queue: VecDeque<NodeIndex> = graph
            .outgoing_from(iterator, ports::ARRAY_ITEM)
            .map(|(target, _)| target)
            .collect();

        while let Some(node) = queue.pop_front() {
            if node == collector || members.contains(&node) {
                continue;
            }
            let definition = graph.node(node);
            match definition.kind {
                NodeKind::Iterator { .. } => {
                    return Err(ValidationError::NestedFanOut {
                        iterator: iterator_name.clone(),
                        node: definition.name.clone(),
                    })
                }
                NodeKind::Output | NodeKind::Collector | NodeKind::Input => {
                    return Err(ValidationError::RegionLeak {
                        iterator: iterator_name.clone(),
                        collector: collector_name.clone(),
                        node: definition.name.clone(),
                    })
                }
                NodeKind::Function { .. } | NodeKind::ModelPrompt { .. } => {}
            }
            if let Some(other) = owner.insert(node, iterator) {
                if other != iterator {
                    return Err(ValidationError::NestedFanOut {
                        iterator: iterator_name.clone(),
                        node: definition.name.clone(),
                    });
                }
            }
            members.insert(node);
            queue.extend(graph.outgoing(node).map(|(target, _)| target));
        }

        let wired = |input: &str, expect: &dyn Fn(NodeIndex, &str) -> bool| {
            graph
                .feeding(collector, input)
                .is_some_and(|(source, connection)| expect(source, connection.source_output.as_str()))
        };
        let items_from_region = wired(ports::ARRAY_ITEM, &|source, output| {
            members.contains(&source) || (source == iterator && output == ports::ARRAY_ITEM)
        });
        let size_from_iterator = wired(ports::ARRAY_SIZE, &|source, output| {
            source == iterator && output == ports::ARRAY_SIZE
        });
        if !items_from_region || !size_from_iterator {
            return Err(ValidationError::CollectorWiring {
                collector: collector_name.clone(),
                iterator: iterator_name.clone(),
            });
        }

        regions.push(FanOutRegion {
            iterator,
            collector,
            members,
        });
    }

    for collector in graph.node_indices() {
        if matches!(graph.node(collector).kind, NodeKind::Collector) {
            let count = claims.get(&collector).copied().unwrap_or(0);
            if count != 1 {
                return Err(ValidationError::UnpairedCollector {
                    collector: graph.node(collector).name.clone(),
                    count,
                });
            }
        }
    }

    Ok(regions)
}
