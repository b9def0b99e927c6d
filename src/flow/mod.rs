/// Flow Definition Layer
///
/// This module handles flow definitions, validation, persistence, and the
/// hot-reload registry. It provides:
/// - Type definitions (FlowDefinition, NodeDefinition, Connection)
/// - A petgraph-backed typed graph with referential integrity checks
/// - Structural validation producing the scheduler's fan-out layout
/// - SQLite persistence with sqlx
/// - Lock-free hot-reload registry using ArcSwap

// Serializable definition types
pub mod types;

// Extraction path evaluation
pub mod path;

// Typed graph built from a definition
pub mod graph;

// Structural validation and fan-out region computation
pub mod validation;

// SQLite persistence layer for flow definitions
pub mod storage;

// Hot-reload registry of compiled flows
pub mod registry;

// The bundled research pipeline definition
pub mod research;

pub use graph::FlowGraph;
pub use registry::{CompiledFlow, FlowRegistry};
pub use types::{Connection, FlowDefinition, ModelTier, NodeDefinition, NodeKind, PayloadType};
pub use validation::{validate, FanOutRegion, FlowLayout, ValidationError};
