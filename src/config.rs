//! Declarative descriptor format.
//!
//! Descriptors are authored as YAML or JSON and compiled into an immutable
//! [`Descriptor`](crate::rule::Descriptor) snapshot.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level rewrite descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorConfig {
    /// Descriptor format version
    pub version: String,
    /// Global settings
    pub settings: Settings,
    /// Function bindings visible to the rules. `None` exposes every function
    /// of the engine's catalog under its own name.
    pub functions: Option<Vec<FunctionBinding>>,
    /// Rewrite rules, evaluated in order
    pub rules: Vec<Rule>,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            version: "1".to_string(),
            settings: Settings::default(),
            functions: None,
            rules: vec![],
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum body size accepted for rewriting (bytes)
    pub max_body_size: usize,
    /// Timeout for each function resolution when the request supplies none (ms)
    pub timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024, // 10MB
            timeout_ms: 1000,
        }
    }
}

/// Exposes a catalog function to the descriptor's templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FunctionBinding {
    /// Bind a function under its own name
    Name(String),
    /// Bind `function` under the alias `name`
    Alias { name: String, function: String },
}

impl FunctionBinding {
    /// Name visible to templates.
    pub fn name(&self) -> &str {
        match self {
            FunctionBinding::Name(name) => name,
            FunctionBinding::Alias { name, .. } => name,
        }
    }

    /// Catalog function the name resolves to.
    pub fn target(&self) -> &str {
        match self {
            FunctionBinding::Name(name) => name,
            FunctionBinding::Alias { function, .. } => function,
        }
    }
}

/// A rewrite rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Rule name (for logging/debugging)
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: String,
    /// Whether the rule is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Request or response side
    #[serde(default)]
    pub direction: Direction,
    /// What the rule rewrites
    pub scope: Scope,
    /// URL path template (url scope)
    #[serde(default)]
    pub pattern: Option<String>,
    /// Node selector (xml/json scope)
    #[serde(default)]
    pub selector: Option<String>,
    /// Regex the current scalar value must match (xml/json scope)
    #[serde(default)]
    pub value: Option<String>,
    /// Rewrite template
    pub template: String,
    /// Append the incoming query to the rewritten URL (url scope)
    #[serde(default = "default_true")]
    pub preserve_query: bool,
}

fn default_true() -> bool {
    true
}

/// Side of the exchange a rule applies to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Requests flowing to the backend
    #[default]
    Inbound,
    /// Responses flowing back to the client
    Outbound,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        })
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inbound" | "in" | "request" => Ok(Direction::Inbound),
            "outbound" | "out" | "response" => Ok(Direction::Outbound),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

/// Content a rule rewrites.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Url,
    Xml,
    Json,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Scope::Url => "url",
            Scope::Xml => "xml",
            Scope::Json => "json",
        })
    }
}

/// Static service directory used by the CLI and tests.
///
/// ```yaml
/// clusters:
///   test-cluster:
///     NAMENODE: "hdfs://nn-host:8020"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServicesConfig {
    pub clusters: HashMap<String, HashMap<String, String>>,
}
