/// Bundled research pipeline
///
/// A web-research flow: an initial search seeds a balanced-tier prompt that
/// writes follow-up queries; each query is searched, scraped and summarised on
/// its own branch; the summaries are collected in query order and handed to a
/// strategic-tier prompt that writes the final report.
///
/// Function identities used: `tavily_search`, `scraper`, `string2array`,
/// `array2string`. The last two are built in; the first two must be provided
/// by the deployment (see `FLOWRUNNER_FUNCTION_ENDPOINTS`).

use crate::flow::types::{ports, Connection, FlowDefinition, ModelTier, NodeDefinition, PayloadType};

pub const RESEARCH_FLOW_ID: &str = "research";

/// Timeout for the search and scrape calls, which do network I/O of their own
const FETCH_TIMEOUT_SECS: u64 = 120;

/// Function node with the conventional single `codeHookInput` / `functionResponse` ports
fn function(
    name: &str,
    function: &str,
    input: PayloadType,
    expression: &str,
    output: PayloadType,
) -> NodeDefinition {
    NodeDefinition::function(name, function)
        .input(ports::FUNCTION_INPUT, input, Some(expression))
        .output(ports::FUNCTION_RESPONSE, output)
}

/// Connection into a Function node's `codeHookInput`
fn into_function(source: &str, source_output: &str, target: &str, payload_type: PayloadType) -> Connection {
    Connection::new(source, source_output, target, ports::FUNCTION_INPUT, payload_type)
}

/// Build the research flow definition
///
/// Input document: `{ "task": String, "now": String }`. Output: the report as
/// a String.
pub fn research_flow() -> FlowDefinition {
    use PayloadType::{Array, Number, Object, String};

    FlowDefinition::new(RESEARCH_FLOW_ID, "Web research report")
        .node(NodeDefinition::input_node("FlowInputNode"))
        .node(
            function("pre_search", "tavily_search", String, "$.data.task", Object)
                .with_timeout_secs(FETCH_TIMEOUT_SECS),
        )
        .node(function("array2string_1", "array2string", Array, "$.data.result", String))
        .node(
            NodeDefinition::model_prompt("generate_search_queries_prompt", "generate_search_queries_prompt", ModelTier::Balanced)
                .input("task", String, Some("$.data.task"))
                .input("now", String, Some("$.data.now"))
                .input("context", String, Some("$.data")),
        )
        .node(function("string2array_1", "string2array", String, "$.data", Array))
        .node(NodeDefinition::iterator("IteratorNode_1", "CollectorNode_1", String))
        .node(
            function("sub_search", "tavily_search", String, "$.data", Object)
                .with_timeout_secs(FETCH_TIMEOUT_SECS),
        )
        .node(
            function("scraper", "scraper", Array, "$.data.result.*.href", Array)
                .with_timeout_secs(FETCH_TIMEOUT_SECS),
        )
        .node(function("array2string_3", "array2string", Array, "$.data", String))
        .node(
            NodeDefinition::model_prompt("generate_summary_prompt", "generate_summary_prompt", ModelTier::Fast)
                .input("data", String, Some("$.data"))
                .input("query", String, Some("$.data")),
        )
        .node(NodeDefinition::collector("CollectorNode_1", String))
        .node(function("array2string_2", "array2string", Array, "$.data", String))
        .node(
            NodeDefinition::model_prompt("generate_report_prompt", "generate_report_prompt", ModelTier::Strategic)
                .input("context", String, Some("$.data"))
                .input("question", String, Some("$.data.task"))
                .input("now", String, Some("$.data.now")),
        )
        .node(NodeDefinition::output_node("FlowOutputNode_2", String))
        // initial search and query generation
        .connect(into_function("FlowInputNode", ports::DOCUMENT, "pre_search", String))
        .connect(into_function("pre_search", ports::FUNCTION_RESPONSE, "array2string_1", Array))
        .connect(Connection::new("FlowInputNode", ports::DOCUMENT, "generate_search_queries_prompt", "task", String))
        .connect(Connection::new("FlowInputNode", ports::DOCUMENT, "generate_search_queries_prompt", "now", String))
        .connect(Connection::new(
            "array2string_1",
            ports::FUNCTION_RESPONSE,
            "generate_search_queries_prompt",
            "context",
            String,
        ))
        .connect(into_function("generate_search_queries_prompt", ports::MODEL_COMPLETION, "string2array_1", String))
        .connect(Connection::new("string2array_1", ports::FUNCTION_RESPONSE, "IteratorNode_1", ports::ARRAY, Array))
        // per-query branch
        .connect(into_function("IteratorNode_1", ports::ARRAY_ITEM, "sub_search", String))
        .connect(into_function("sub_search", ports::FUNCTION_RESPONSE, "scraper", Array))
        .connect(into_function("scraper", ports::FUNCTION_RESPONSE, "array2string_3", Array))
        .connect(Connection::new("array2string_3", ports::FUNCTION_RESPONSE, "generate_summary_prompt", "data", String))
        .connect(Connection::new("IteratorNode_1", ports::ARRAY_ITEM, "generate_summary_prompt", "query", String))
        .connect(Connection::new(
            "generate_summary_prompt",
            ports::MODEL_COMPLETION,
            "CollectorNode_1",
            ports::ARRAY_ITEM,
            String,
        ))
        .connect(Connection::new("IteratorNode_1", ports::ARRAY_SIZE, "CollectorNode_1", ports::ARRAY_SIZE, Number))
        // report
        .connect(into_function("CollectorNode_1", ports::COLLECTED_ARRAY, "array2string_2", Array))
        .connect(Connection::new("array2string_2", ports::FUNCTION_RESPONSE, "generate_report_prompt", "context", String))
        .connect(Connection::new("FlowInputNode", ports::DOCUMENT, "generate_report_prompt", "question", String))
        .connect(Connection::new("FlowInputNode", ports::DOCUMENT, "generate_report_prompt", "now", String))
        .connect(Connection::new(
            "generate_report_prompt",
            ports::MODEL_COMPLETION,
            "FlowOutputNode_2",
            ports::DOCUMENT,
            String,
        ))
}
