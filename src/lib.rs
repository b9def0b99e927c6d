/// Flowrunner: typed flow execution engine
///
/// Runs flows of typed nodes (Input, Output, Function, ModelPrompt, Iterator,
/// Collector) connected by typed, path-extracting connections. Validated flows
/// are executed concurrently, with ordered fan-out/fan-in over arrays.

// Core configuration and setup
pub mod config;

// Invocation and collaborator error types
pub mod error;

// Flow definitions, validation, storage and the hot-reload registry
pub mod flow;

// Runtime execution engine - scheduler, collaborators and node execution
pub mod runtime;

// HTTP API layer - REST endpoints for flow management and invocation
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{CollaboratorError, FlowError, FlowResult};
pub use flow::{CompiledFlow, FlowDefinition, FlowRegistry, NodeDefinition, NodeKind, ValidationError};
pub use runtime::{FlowEngine, FunctionInvoker, InvocationResult, ModelInvoker};
pub use server::start_server;
