/// Error types for flow invocation
///
/// Every terminal invocation failure is a single [`FlowError`] naming the node
/// that failed, its kind, its branch index inside a fan-out region, and the
/// underlying cause. Graph-shape problems are reported earlier as
/// [`ValidationError`] and never reach the scheduler.

use std::time::Duration;
use thiserror::Error;

pub use crate::flow::validation::ValidationError;

/// Result type alias using FlowError
pub type FlowResult<T> = std::result::Result<T, FlowError>;

/// Failure reported by a Function or Model collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// The collaborator ran and reported failure
    #[error("{0}")]
    Failed(String),

    /// The call did not finish within the node's timeout
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// No handler is registered for the function identity
    #[error("no collaborator registered for function '{0}'")]
    UnknownFunction(String),

    /// The collaborator could not be reached
    #[error("transport error: {0}")]
    Transport(String),

    /// The collaborator answered with something the engine cannot use
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl CollaboratorError {
    /// Create a failure with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Terminal failure of one invocation
#[derive(Debug, Error)]
pub enum FlowError {
    /// An extraction path did not resolve, or resolved to the wrong type
    #[error("node '{node}' ({kind}){} failed to extract input '{port}' via '{path}': {reason}", branch_suffix(.branch))]
    Extraction {
        node: String,
        kind: &'static str,
        branch: Option<usize>,
        port: String,
        path: String,
        reason: String,
    },

    /// A Function or Model collaborator failed or timed out
    #[error("node '{node}' ({kind}){} collaborator '{collaborator}' failed: {source}", branch_suffix(.branch))]
    Collaborator {
        node: String,
        kind: &'static str,
        branch: Option<usize>,
        collaborator: String,
        #[source]
        source: CollaboratorError,
    },

    /// No node can make progress and the Output node has no value
    #[error("flow stalled before producing output; unresolved nodes: {}", .unresolved.join(", "))]
    StuckGraph { unresolved: Vec<String> },

    /// The caller aborted the invocation
    #[error("invocation cancelled")]
    Cancelled,

    /// The external input document is not usable
    #[error("invalid input document: {0}")]
    InvalidInput(String),
}

fn branch_suffix(branch: &Option<usize>) -> String {
    match branch {
        Some(index) => format!(" [branch {}]", index),
        None => String::new(),
    }
}

impl FlowError {
    /// Name of the node whose failure ended the invocation
    pub fn failing_node(&self) -> Option<&str> {
        match self {
            Self::Extraction { node, .. } | Self::Collaborator { node, .. } => Some(node.as_str()),
            _ => None,
        }
    }

    /// Kind label of the failing node
    pub fn kind(&self) -> Option<&'static str> {
        match self {
            Self::Extraction { kind, .. } | Self::Collaborator { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Branch index of the failing node, if it ran inside a fan-out region
    pub fn branch(&self) -> Option<usize> {
        match self {
            Self::Extraction { branch, .. } | Self::Collaborator { branch, .. } => *branch,
            _ => None,
        }
    }

    /// Stable machine-readable category
    pub fn category(&self) -> &'static str {
        match self {
            Self::Extraction { .. } => "extraction",
            Self::Collaborator { .. } => "collaborator",
            Self::StuckGraph { .. } => "stuck_graph",
            Self::Cancelled => "cancelled",
            Self::InvalidInput(_) => "invalid_input",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_error_display_names_node_and_branch() {
        let err = FlowError::Collaborator {
            node: "scraper".to_string(),
            kind: "Function",
            branch: Some(2),
            collaborator: "scraper".to_string(),
            source: CollaboratorError::Timeout(Duration::from_secs(5)),
        };
        let text = err.to_string();
        assert!(text.contains("'scraper'"));
        assert!(text.contains("[branch 2]"));
        assert!(text.contains("timed out"));
        assert_eq!(err.failing_node(), Some("scraper"));
        assert_eq!(err.branch(), Some(2));
        assert_eq!(err.kind(), Some("Function"));
        assert_eq!(err.category(), "collaborator");
    }

    #[test]
    fn test_unscoped_failure_has_no_branch_suffix() {
        let err = FlowError::Extraction {
            node: "pre_search".to_string(),
            kind: "Function",
            branch: None,
            port: "codeHookInput".to_string(),
            path: "$.data.task".to_string(),
            reason: "path matched nothing".to_string(),
        };
        assert!(!err.to_string().contains("branch"));
        assert_eq!(err.branch(), None);
    }

    #[test]
    fn test_stuck_graph_lists_nodes() {
        let err = FlowError::StuckGraph {
            unresolved: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "flow stalled before producing output; unresolved nodes: a, b");
        assert_eq!(err.failing_node(), None);
    }
}
