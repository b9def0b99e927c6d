/// Typed flow graph
///
/// Wraps a [`FlowDefinition`] in a petgraph `DiGraph` whose node indices follow
/// definition order and whose edge weights point back at the defining
/// connection. Referential integrity (unique node names, connections that name
/// existing nodes and declared ports) is checked here, at construction time;
/// structural rules live in [`crate::flow::validation`].

use crate::flow::types::{Connection, FlowDefinition, NodeDefinition, VALUE_ROOT};
use crate::flow::validation::ValidationError;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;

/// Immutable, index-addressed view over a flow definition
#[derive(Debug, Clone)]
pub struct FlowGraph {
    definition: FlowDefinition,
    /// Edge weight = position of the connection in `definition.connections`
    graph: DiGraph<(), usize>,
    by_name: HashMap<String, NodeIndex>,
}

impl FlowGraph {
    /// Build the graph, rejecting duplicate names and dangling references
    pub fn new(definition: FlowDefinition) -> Result<Self, ValidationError> {
        tracing::debug!(
            "🏗️ Building flow graph for '{}' with {} nodes and {} connections",
            definition.id,
            definition.nodes.len(),
            definition.connections.len()
        );

        let mut graph = DiGraph::with_capacity(definition.nodes.len(), definition.connections.len());
        let mut by_name = HashMap::with_capacity(definition.nodes.len());

        for node in &definition.nodes {
            let index = graph.add_node(());
            if by_name.insert(node.name.clone(), index).is_some() {
                return Err(ValidationError::DuplicateNode {
                    node: node.name.clone(),
                });
            }
        }

        for (position, connection) in definition.connections.iter().enumerate() {
            let source = resolve_node(&by_name, &connection.source)?;
            let target = resolve_node(&by_name, &connection.target)?;

            let source_node = &definition.nodes[source.index()];
            if source_node.find_output(&connection.source_output).is_none() {
                return Err(ValidationError::UnknownPort {
                    node: connection.source.clone(),
                    port: connection.source_output.clone(),
                });
            }
            let target_node = &definition.nodes[target.index()];
            if target_node.find_input(&connection.target_input).is_none() {
                return Err(ValidationError::UnknownPort {
                    node: connection.target.clone(),
                    port: connection.target_input.clone(),
                });
            }

            graph.add_edge(source, target, position);
        }

        Ok(Self {
            definition,
            graph,
            by_name,
        })
    }

    pub fn definition(&self) -> &FlowDefinition {
        &self.definition
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    /// Underlying petgraph structure
    pub fn graph(&self) -> &DiGraph<(), usize> {
        &self.graph
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    pub fn node(&self, index: NodeIndex) -> &NodeDefinition {
        &self.definition.nodes[index.index()]
    }

    pub fn index_of(&self, name: &str) -> Option<NodeIndex> {
        self.by_name.get(name).copied()
    }

    /// Connections entering `index`, paired with their source node
    pub fn incoming(&self, index: NodeIndex) -> impl Iterator<Item = (NodeIndex, &Connection)> + '_ {
        self.graph
            .edges_directed(index, Direction::Incoming)
            .map(move |edge| (edge.source(), &self.definition.connections[*edge.weight()]))
    }

    /// Connections leaving `index`, paired with their target node
    pub fn outgoing(&self, index: NodeIndex) -> impl Iterator<Item = (NodeIndex, &Connection)> + '_ {
        self.graph
            .edges_directed(index, Direction::Outgoing)
            .map(move |edge| (edge.target(), &self.definition.connections[*edge.weight()]))
    }

    /// Connections leaving a specific output port
    pub fn outgoing_from<'a>(
        &'a self,
        index: NodeIndex,
        output: &'a str,
    ) -> impl Iterator<Item = (NodeIndex, &'a Connection)> + 'a {
        self.outgoing(index).filter(move |(_, c)| c.source_output == output)
    }

    /// The connection feeding a given input port, with its source node
    ///
    /// Unique once the graph has been validated.
    pub fn feeding(&self, index: NodeIndex, input: &str) -> Option<(NodeIndex, &Connection)> {
        self.incoming(index).find(|(_, c)| c.target_input == input)
    }

    /// Extraction path in effect for a connection
    ///
    /// The connection's own path wins, then the target port's expression, then
    /// the identity path.
    pub fn effective_path<'a>(&'a self, connection: &'a Connection) -> &'a str {
        if let Some(path) = connection.path.as_deref() {
            return path;
        }
        self.index_of(&connection.target)
            .and_then(|target| self.node(target).find_input(&connection.target_input))
            .and_then(|port| port.expression.as_deref())
            .unwrap_or(VALUE_ROOT)
    }
}

fn resolve_node(by_name: &HashMap<String, NodeIndex>, name: &str) -> Result<NodeIndex, ValidationError> {
    by_name
        .get(name)
        .copied()
        .ok_or_else(|| ValidationError::UnknownNode { node: name.to_string() })
}
