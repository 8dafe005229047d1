//! Shared types for the provider host.
//!
//! JSON-RPC 2.0 envelopes, provider templates and configurations, and the
//! derived catalog/status views.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: &str, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
///
/// The error object is kept as raw JSON: it is handed back to the caller
/// untouched as the provider's error payload.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl JsonRpcResponse {
    /// The correlation id as a string key, if the response carries one.
    ///
    /// Numeric ids are accepted and stringified so that providers echoing
    /// our ids with a different JSON type still correlate.
    pub fn correlation_id(&self) -> Option<String> {
        match self.id.as_ref()? {
            serde_json::Value::String(id) => Some(id.clone()),
            serde_json::Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }
}

// ─── Tool Protocol Types ─────────────────────────────────────────────────────

/// Tool definition as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema", alias = "input_schema")]
    pub input_schema: Option<serde_json::Value>,
}

/// `tools/list` result payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// One tool in the combined catalog presented to the LLM.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// `sanitized_provider + "_" + tool`, unique across the catalog.
    pub global_name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    /// Registry name of the owning provider (unsanitized).
    pub provider: String,
    /// Tool name as the provider knows it.
    pub tool: String,
}

// ─── Provider Configuration ──────────────────────────────────────────────────

/// Built-in blueprint for a known provider kind.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderTemplate {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub command: &'static str,
    pub base_args: &'static [&'static str],
    pub required_env_vars: &'static [&'static str],
    pub description: &'static str,
}

/// A configured provider instance, as persisted in the registry store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Unique registry key.
    pub name: String,
    /// Template type this config was created from (`"custom"` otherwise).
    #[serde(rename = "type", alias = "server_type")]
    pub kind: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Variables overlaid on the host environment at launch.
    #[serde(default, alias = "env_vars")]
    pub env_vars: BTreeMap<String, String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ProviderConfig {
    /// A hand-written provider config not derived from a template.
    pub fn custom(name: &str, command: &str, args: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            kind: "custom".to_string(),
            command: command.to_string(),
            args,
            env_vars: BTreeMap::new(),
            description: String::new(),
            enabled: true,
        }
    }
}

/// Launch triple exported for external launchers (`command`, `args`, `env`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// Combined registry + running-set view of one provider.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub enabled: bool,
    pub running: bool,
    pub pid: Option<u32>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
