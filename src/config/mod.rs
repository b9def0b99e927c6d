/// Configuration management for the flowrunner server
///
/// Handles server binding, the definition database, engine limits and the
/// endpoints of the external Function and Model collaborators. Every value can
/// be set from the environment for container deployment.

use crate::flow::types::ModelTier;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub collaborators: CollaboratorConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    pub port: u16,
}

/// Flow definition storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file holding flow definitions (default: "data/flows.db")
    pub path: String,
}

/// Scheduler limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of collaborator calls in flight across all invocations
    pub max_concurrency: usize,
    /// Timeout for a single Function or Model call unless the node overrides it
    pub node_timeout_secs: u64,
}

impl EngineConfig {
    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            node_timeout_secs: 120,
        }
    }
}

/// Where external functions and models live
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    /// Function identity → HTTP endpoint
    pub function_endpoints: HashMap<String, String>,
    /// Model gateway endpoint; model prompts fail when unset
    pub model_endpoint: Option<String>,
    pub models: TierModels,
}

/// Model identifier used for each tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierModels {
    pub fast: String,
    pub balanced: String,
    pub strategic: String,
}

impl TierModels {
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Balanced => &self.balanced,
            ModelTier::Strategic => &self.strategic,
        }
    }
}

impl Default for TierModels {
    fn default() -> Self {
        Self {
            fast: "fast_llm".to_string(),
            balanced: "smart_llm".to_string(),
            strategic: "strategic_llm".to_string(),
        }
    }
}

/// Parse `name=url` pairs separated by commas
///
/// Blank entries are ignored; entries without `=` are skipped with a warning.
pub fn parse_function_endpoints(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.split_once('=') {
            Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => {
                Some((name.trim().to_string(), url.trim().to_string()))
            }
            _ => {
                tracing::warn!("⚠️ Ignoring malformed function endpoint entry: '{}'", entry);
                None
            }
        })
        .collect()
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        let engine_defaults = EngineConfig::default();
        let model_defaults = TierModels::default();

        Self {
            server: ServerConfig {
                host: env_or("FLOWRUNNER_HOST", "0.0.0.0"),
                port: env_parsed("FLOWRUNNER_PORT", 3004),
            },
            database: DatabaseConfig {
                path: env_or("FLOWRUNNER_DATABASE", "data/flows.db"),
            },
            engine: EngineConfig {
                max_concurrency: env_parsed("FLOWRUNNER_MAX_CONCURRENCY", engine_defaults.max_concurrency).max(1),
                node_timeout_secs: env_parsed("FLOWRUNNER_NODE_TIMEOUT_SECS", engine_defaults.node_timeout_secs),
            },
            collaborators: CollaboratorConfig {
                function_endpoints: std::env::var("FLOWRUNNER_FUNCTION_ENDPOINTS")
                    .map(|raw| parse_function_endpoints(&raw))
                    .unwrap_or_default(),
                model_endpoint: std::env::var("FLOWRUNNER_MODEL_ENDPOINT")
                    .ok()
                    .filter(|v| !v.trim().is_empty()),
                models: TierModels {
                    fast: env_or("FLOWRUNNER_MODEL_FAST", &model_defaults.fast),
                    balanced: env_or("FLOWRUNNER_MODEL_BALANCED", &model_defaults.balanced),
                    strategic: env_or("FLOWRUNNER_MODEL_STRATEGIC", &model_defaults.strategic),
                },
            },
        }
    }
}
