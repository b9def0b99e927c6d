/// Scripted in-memory collaborators for tests
///
/// Each function identity or template gets a handler and an optional delay
/// computed from its input, which lets tests force out-of-order completion,
/// timeouts and failures on specific branches.

use crate::error::CollaboratorError;
use crate::flow::types::ModelTier;
use crate::runtime::invoker::{FunctionInvoker, ModelInvoker};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Delay = Arc<dyn Fn(&Value) -> Duration + Send + Sync>;
type FunctionBody = Arc<dyn Fn(Value) -> Result<Value, CollaboratorError> + Send + Sync>;
type ModelBody = Arc<dyn Fn(&HashMap<String, Value>, ModelTier) -> Result<String, CollaboratorError> + Send + Sync>;
type ModelDelay = Arc<dyn Fn(&HashMap<String, Value>) -> Duration + Send + Sync>;

/// Counters shared by the scripted collaborators
#[derive(Debug, Default)]
pub struct CallLog {
    calls: Mutex<Vec<(String, Value)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    finished: AtomicUsize,
}

impl CallLog {
    fn start(&self, name: &str, input: Value) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((name.to_string(), input));
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    /// Every call started so far, in start order
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Inputs of the calls made to one function identity or template
    pub fn calls_to(&self, name: &str) -> Vec<Value> {
        self.calls().into_iter().filter(|(n, _)| n == name).map(|(_, v)| v).collect()
    }

    pub fn started(&self) -> usize {
        self.calls().len()
    }

    /// Calls that ran to completion (aborted ones never finish)
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight counter even when the call is dropped mid-way
struct InFlight<'a>(&'a CallLog, bool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.1 {
            self.0.finish();
        } else {
            self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[derive(Clone, Default)]
pub struct ScriptedFunctions {
    bodies: HashMap<String, (Delay, FunctionBody)>,
    log: Arc<CallLog>,
}

impl ScriptedFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond<F>(self, function: &str, body: F) -> Self
    where
        F: Fn(Value) -> Result<Value, CollaboratorError> + Send + Sync + 'static,
    {
        self.respond_with_delay(function, |_| Duration::ZERO, body)
    }

    pub fn respond_after<F>(self, function: &str, delay: Duration, body: F) -> Self
    where
        F: Fn(Value) -> Result<Value, CollaboratorError> + Send + Sync + 'static,
    {
        self.respond_with_delay(function, move |_| delay, body)
    }

    pub fn respond_with_delay<D, F>(mut self, function: &str, delay: D, body: F) -> Self
    where
        D: Fn(&Value) -> Duration + Send + Sync + 'static,
        F: Fn(Value) -> Result<Value, CollaboratorError> + Send + Sync + 'static,
    {
        self.bodies.insert(function.to_string(), (Arc::new(delay), Arc::new(body)));
        self
    }

    pub fn log(&self) -> Arc<CallLog> {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl FunctionInvoker for ScriptedFunctions {
    async fn invoke(&self, function: &str, input: Value) -> Result<Value, CollaboratorError> {
        let Some((delay, body)) = self.bodies.get(function) else {
            return Err(CollaboratorError::UnknownFunction(function.to_string()));
        };

        self.log.start(function, input.clone());
        let mut guard = InFlight(&self.log, false);
        let wait = delay(&input);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        guard.1 = true;
        body(input)
    }
}

#[derive(Clone, Default)]
pub struct ScriptedModel {
    bodies: HashMap<String, (ModelDelay, ModelBody)>,
    log: Arc<CallLog>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond<F>(self, template: &str, body: F) -> Self
    where
        F: Fn(&HashMap<String, Value>, ModelTier) -> Result<String, CollaboratorError> + Send + Sync + 'static,
    {
        self.respond_with_delay(template, |_| Duration::ZERO, body)
    }

    pub fn respond_with_delay<D, F>(mut self, template: &str, delay: D, body: F) -> Self
    where
        D: Fn(&HashMap<String, Value>) -> Duration + Send + Sync + 'static,
        F: Fn(&HashMap<String, Value>, ModelTier) -> Result<String, CollaboratorError> + Send + Sync + 'static,
    {
        self.bodies.insert(template.to_string(), (Arc::new(delay), Arc::new(body)));
        self
    }

    pub fn log(&self) -> Arc<CallLog> {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl ModelInvoker for ScriptedModel {
    async fn complete(
        &self,
        template: &str,
        variables: &HashMap<String, Value>,
        tier: ModelTier,
    ) -> Result<String, CollaboratorError> {
        let Some((delay, body)) = self.bodies.get(template) else {
            return Err(CollaboratorError::failed(format!("unknown template '{}'", template)));
        };

        let recorded: serde_json::Map<String, Value> =
            variables.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        self.log.start(template, Value::Object(recorded));
        let mut guard = InFlight(&self.log, false);
        let wait = delay(variables);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        guard.1 = true;
        body(variables, tier)
    }
}
