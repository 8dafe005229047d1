//! Tool-provider error types.
//!
//! One enum covers the whole provider stack. `kind()` groups the variants
//! into the four recovery classes callers care about: configuration, process,
//! transport and persistence failures.

use thiserror::Error;

/// Broad failure class of a [`ProviderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown provider/template/tool, or a disabled provider.
    Config,
    /// The provider process could not be launched.
    Process,
    /// A request/response exchange with a running provider failed.
    Transport,
    /// The registry store could not be read or written.
    Persistence,
}

/// Errors that can occur while managing or talking to tool providers.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// No provider configuration with this name.
    #[error("unknown provider: '{name}'")]
    UnknownProvider { name: String },

    /// No built-in template for this provider type.
    #[error("unknown provider type: '{kind}'")]
    UnknownTemplate { kind: String },

    /// The provider exists but is disabled.
    #[error("provider '{name}' is disabled")]
    ProviderDisabled { name: String },

    /// Tool name not present in the last built catalog.
    #[error("unknown tool: '{name}'")]
    UnknownTool { name: String },

    /// Two providers produced the same catalog name for a tool.
    #[error("tool name '{name}' from provider '{provider}' collides with provider '{existing}'")]
    DuplicateTool {
        name: String,
        provider: String,
        existing: String,
    },

    /// The provider process failed to start.
    #[error("failed to spawn provider '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// No response line arrived within the request timeout.
    #[error(
        "provider '{provider}' did not answer '{method}' within {timeout_ms}ms{}",
        log_suffix(.recent_logs)
    )]
    Timeout {
        provider: String,
        method: String,
        timeout_ms: u64,
        recent_logs: Vec<String>,
    },

    /// The provider closed its output stream (usually: the process exited).
    #[error("no response from provider '{provider}' to '{method}'{}", log_suffix(.recent_logs))]
    NoResponse {
        provider: String,
        method: String,
        recent_logs: Vec<String>,
    },

    /// A line on the provider's output was not a valid JSON-RPC response.
    #[error("malformed response from provider '{provider}': {reason}")]
    MalformedResponse { provider: String, reason: String },

    /// The provider answered with a JSON-RPC `error` object.
    #[error("provider '{provider}' returned an error: {}", rpc_message(.payload))]
    RpcError {
        provider: String,
        payload: serde_json::Value,
    },

    /// Writing the request to the provider's input failed.
    #[error("failed to write to provider '{provider}': {reason}")]
    WriteFailed { provider: String, reason: String },

    /// The registry store could not be read or written.
    #[error("config store error at {path}: {reason}")]
    Persistence { path: String, reason: String },
}

impl ProviderError {
    /// Recovery class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownProvider { .. }
            | Self::UnknownTemplate { .. }
            | Self::ProviderDisabled { .. }
            | Self::UnknownTool { .. }
            | Self::DuplicateTool { .. } => ErrorKind::Config,
            Self::SpawnFailed { .. } => ErrorKind::Process,
            Self::Timeout { .. }
            | Self::NoResponse { .. }
            | Self::MalformedResponse { .. }
            | Self::RpcError { .. }
            | Self::WriteFailed { .. } => ErrorKind::Transport,
            Self::Persistence { .. } => ErrorKind::Persistence,
        }
    }

    /// Whether the failure came from the wire rather than from configuration.
    ///
    /// Repeated transient failures are the caller's cue to restart the
    /// provider; the manager itself never restarts on timeout.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Diagnostic lines captured from the provider's stderr, if attached.
    pub fn recent_logs(&self) -> &[String] {
        match self {
            Self::Timeout { recent_logs, .. } | Self::NoResponse { recent_logs, .. } => recent_logs,
            _ => &[],
        }
    }
}

fn log_suffix(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        format!(" | recent stderr: {}", lines.join(" / "))
    }
}

/// Human-readable text of a JSON-RPC error payload.
fn rpc_message(payload: &serde_json::Value) -> String {
    let message = payload.get("message").and_then(|m| m.as_str());
    let code = payload.get("code").and_then(|c| c.as_i64());
    match (code, message) {
        (Some(code), Some(message)) => format!("[{code}] {message}"),
        (None, Some(message)) => message.to_string(),
        _ => payload.to_string(),
    }
}
