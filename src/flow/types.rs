/// Core flow definition types
///
/// Defines the serializable description of a flow: nodes with typed input and
/// output ports, and typed connections between them. This is the persisted
/// configuration format - it is stored as JSON and must round-trip unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known port names shared by the engine and the bundled flows
pub mod ports {
    /// Single output of an Input node and single input of an Output node
    pub const DOCUMENT: &str = "document";
    /// Array input of an Iterator node
    pub const ARRAY: &str = "array";
    /// Branch-scoped element output of an Iterator, branch-scoped input of a Collector
    pub const ARRAY_ITEM: &str = "arrayItem";
    /// Unscoped element count shared by an Iterator and its Collector
    pub const ARRAY_SIZE: &str = "arraySize";
    /// Array output of a Collector
    pub const COLLECTED_ARRAY: &str = "collectedArray";
    /// Conventional input of a Function node
    pub const FUNCTION_INPUT: &str = "codeHookInput";
    /// Conventional output of a Function node
    pub const FUNCTION_RESPONSE: &str = "functionResponse";
    /// Conventional output of a ModelPrompt node
    pub const MODEL_COMPLETION: &str = "modelCompletion";
}

/// Root of every extraction expression: the incoming value is bound as `data`
pub const VALUE_ROOT: &str = "$.data";

/// A complete flow definition containing nodes and their connections
///
/// Flows are stored as JSON in SQLite and compiled into a validated
/// [`crate::flow::FlowGraph`] before any invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// Unique flow identifier (e.g., "research")
    pub id: String,
    /// Human-readable flow name
    pub name: String,
    /// Nodes in this flow
    pub nodes: Vec<NodeDefinition>,
    /// Typed data connections between node ports
    pub connections: Vec<Connection>,
}

impl FlowDefinition {
    /// Create an empty definition
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Add a node (builder style)
    pub fn node(mut self, node: NodeDefinition) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add a connection (builder style)
    pub fn connect(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }

    /// Find a node by name
    pub fn find_node(&self, name: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

/// Payload type carried by a port or a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadType {
    String,
    Number,
    Object,
    Array,
}

impl PayloadType {
    /// Runtime type of a JSON value, if it is one of the four payload shapes
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::String(_) => Some(Self::String),
            Value::Number(_) => Some(Self::Number),
            Value::Object(_) => Some(Self::Object),
            Value::Array(_) => Some(Self::Array),
            Value::Null | Value::Bool(_) => None,
        }
    }

    /// Whether a value of this type can be indexed by an extraction path
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Object | Self::Array)
    }
}

impl std::fmt::Display for PayloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::String => "String",
            Self::Number => "Number",
            Self::Object => "Object",
            Self::Array => "Array",
        };
        f.write_str(name)
    }
}

/// Cost/latency/quality tier handed to the model collaborator untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Fast,
    #[default]
    Balanced,
    Strategic,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::Strategic => "strategic",
        };
        f.write_str(name)
    }
}

/// The kind of a node, which determines its execution behavior
///
/// Kind-specific configuration travels with the variant so dispatch never
/// depends on string lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeKind {
    /// Entry point: publishes the caller's document
    Input,
    /// Terminal: stores its single input as the invocation result
    Output,
    /// External function call
    /// Expected ports: one or more inputs, exactly one output
    Function { function: String },
    /// Template-driven model completion
    /// Expected ports: template variables as inputs, one String output
    ModelPrompt {
        template: String,
        #[serde(default)]
        tier: ModelTier,
    },
    /// Fan-out over an Array, paired explicitly with the Collector that closes the region
    /// Expected ports: `array` in, `arrayItem` + `arraySize` out
    Iterator { collector: String },
    /// Fan-in of branch results in branch-index order
    /// Expected ports: `arrayItem` + `arraySize` in, `collectedArray` out
    Collector,
}

impl NodeKind {
    /// Short label used in logs and error reports
    pub fn label(&self) -> &'static str {
        match self {
            Self::Input => "Input",
            Self::Output => "Output",
            Self::Function { .. } => "Function",
            Self::ModelPrompt { .. } => "ModelPrompt",
            Self::Iterator { .. } => "Iterator",
            Self::Collector => "Collector",
        }
    }
}

/// Declared input port of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPort {
    pub name: String,
    #[serde(rename = "type")]
    pub payload_type: PayloadType,
    /// Extraction expression rooted at `$.data`; `None` passes the value through
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

/// Declared output port of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPort {
    pub name: String,
    #[serde(rename = "type")]
    pub payload_type: PayloadType,
}

/// A single node in the flow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    /// Unique node name within the flow (e.g., "pre_search")
    pub name: String,
    /// Node kind and its configuration
    pub kind: NodeKind,
    #[serde(default)]
    pub inputs: Vec<InputPort>,
    #[serde(default)]
    pub outputs: Vec<OutputPort>,
    /// Per-node override of the engine's collaborator timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl NodeDefinition {
    fn bare(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            timeout_secs: None,
        }
    }

    /// Input node with its Object `document` output
    pub fn input_node(name: impl Into<String>) -> Self {
        Self::bare(name, NodeKind::Input).output(ports::DOCUMENT, PayloadType::Object)
    }

    /// Output node accepting a `document` of the given type
    pub fn output_node(name: impl Into<String>, payload_type: PayloadType) -> Self {
        Self::bare(name, NodeKind::Output).input(ports::DOCUMENT, payload_type, None)
    }

    /// Function node without ports; add them with [`Self::input`] / [`Self::output`]
    pub fn function(name: impl Into<String>, function: impl Into<String>) -> Self {
        Self::bare(name, NodeKind::Function { function: function.into() })
    }

    /// ModelPrompt node with its String `modelCompletion` output
    pub fn model_prompt(name: impl Into<String>, template: impl Into<String>, tier: ModelTier) -> Self {
        Self::bare(
            name,
            NodeKind::ModelPrompt {
                template: template.into(),
                tier,
            },
        )
        .output(ports::MODEL_COMPLETION, PayloadType::String)
    }

    /// Iterator node with the standard `array` / `arrayItem` / `arraySize` ports
    pub fn iterator(name: impl Into<String>, collector: impl Into<String>, item_type: PayloadType) -> Self {
        Self::bare(
            name,
            NodeKind::Iterator {
                collector: collector.into(),
            },
        )
        .input(ports::ARRAY, PayloadType::Array, None)
        .output(ports::ARRAY_ITEM, item_type)
        .output(ports::ARRAY_SIZE, PayloadType::Number)
    }

    /// Collector node with the standard `arrayItem` / `arraySize` / `collectedArray` ports
    pub fn collector(name: impl Into<String>, item_type: PayloadType) -> Self {
        Self::bare(name, NodeKind::Collector)
            .input(ports::ARRAY_ITEM, item_type, None)
            .input(ports::ARRAY_SIZE, PayloadType::Number, None)
            .output(ports::COLLECTED_ARRAY, PayloadType::Array)
    }

    /// Declare an input port
    pub fn input(mut self, name: impl Into<String>, payload_type: PayloadType, expression: Option<&str>) -> Self {
        self.inputs.push(InputPort {
            name: name.into(),
            payload_type,
            expression: expression.map(str::to_string),
        });
        self
    }

    /// Declare an output port
    pub fn output(mut self, name: impl Into<String>, payload_type: PayloadType) -> Self {
        self.outputs.push(OutputPort {
            name: name.into(),
            payload_type,
        });
        self
    }

    /// Set a per-node timeout
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn find_input(&self, name: &str) -> Option<&InputPort> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn find_output(&self, name: &str) -> Option<&OutputPort> {
        self.outputs.iter().find(|p| p.name == name)
    }
}

/// Typed data edge from one node's output port to another node's input port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub source: String,
    pub source_output: String,
    pub target: String,
    pub target_input: String,
    /// Extraction path applied to the source value; overrides the input port's expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(rename = "type")]
    pub payload_type: PayloadType,
}

impl Connection {
    pub fn new(
        source: impl Into<String>,
        source_output: impl Into<String>,
        target: impl Into<String>,
        target_input: impl Into<String>,
        payload_type: PayloadType,
    ) -> Self {
        Self {
            source: source.into(),
            source_output: source_output.into(),
            target: target.into(),
            target_input: target_input.into(),
            path: None,
            payload_type,
        }
    }

    /// Attach an extraction path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_json_round_trip() {
        let definition = FlowDefinition::new("wf", "Round trip")
            .node(NodeDefinition::input_node("in"))
            .node(
                NodeDefinition::function("search", "tavily_search")
                    .input(ports::FUNCTION_INPUT, PayloadType::String, Some("$.data.task"))
                    .output(ports::FUNCTION_RESPONSE, PayloadType::Object)
                    .with_timeout_secs(30),
            )
            .node(NodeDefinition::output_node("out", PayloadType::Object))
            .connect(Connection::new("in", ports::DOCUMENT, "search", ports::FUNCTION_INPUT, PayloadType::String))
            .connect(
                Connection::new("search", ports::FUNCTION_RESPONSE, "out", ports::DOCUMENT, PayloadType::Object)
                    .with_path("$.data"),
            );

        let text = serde_json::to_string(&definition).unwrap();
        let parsed: FlowDefinition = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, definition);
    }

    #[test]
    fn test_node_kind_wire_format() {
        let node = NodeDefinition::model_prompt("summary", "generate_summary_prompt", ModelTier::Fast);
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(
            value["kind"],
            json!({ "type": "modelPrompt", "template": "generate_summary_prompt", "tier": "fast" })
        );
        assert_eq!(value["outputs"][0], json!({ "name": "modelCompletion", "type": "String" }));
        assert!(value.get("timeoutSecs").is_none());
    }

    #[test]
    fn test_payload_type_of_value() {
        assert_eq!(PayloadType::of(&json!("x")), Some(PayloadType::String));
        assert_eq!(PayloadType::of(&json!(1.5)), Some(PayloadType::Number));
        assert_eq!(PayloadType::of(&json!({})), Some(PayloadType::Object));
        assert_eq!(PayloadType::of(&json!([])), Some(PayloadType::Array));
        assert_eq!(PayloadType::of(&json!(null)), None);
        assert_eq!(PayloadType::of(&json!(true)), None);
    }
}
