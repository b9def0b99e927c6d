/// Runtime Execution Engine
///
/// Runs validated flows. It handles:
/// - Ready-set scheduling of node instances with tokio tasks
/// - Branch-scoped execution of fan-out regions and ordered fan-in
/// - Bounded, timed calls to the Function and Model collaborators

// Scheduler loop
pub mod engine;

// Per-invocation values, readiness and collector accumulators
pub mod context;

// Collaborator calls with concurrency limit and timeouts
pub mod executor;

// Function / Model collaborator traits and the function registry
pub mod invoker;

// Local marshaling functions (string2array, array2string, string2object)
pub mod builtins;

// reqwest-backed collaborators
pub mod http;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{FlowEngine, InvocationResult};
pub use executor::{NodeCall, NodeExecutor};
pub use invoker::{FunctionInvoker, FunctionRegistry, ModelInvoker};
