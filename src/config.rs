//! Host settings: runtime knobs for the provider manager.
//!
//! Persisted to `settings.json` in the data directory. Missing or unreadable
//! files fall back to defaults; unknown fields are ignored and absent fields
//! take their default value.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::providers::logs::DEFAULT_LOG_CAPACITY;

/// Runtime settings shared by every provider the manager launches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostSettings {
    /// Upper bound on waiting for one response line.
    pub request_timeout_ms: u64,
    /// Time between SIGTERM and SIGKILL when stopping a provider.
    pub shutdown_grace_ms: u64,
    /// Stderr lines retained per running provider.
    pub log_capacity: usize,
    /// Stderr lines attached to timeout / no-response errors.
    pub log_context_lines: usize,
    /// `clientInfo.name` sent during the initialize handshake.
    pub client_name: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 10_000,
            shutdown_grace_ms: 500,
            log_capacity: DEFAULT_LOG_CAPACITY,
            log_context_lines: 5,
            client_name: "toolbridge".to_string(),
        }
    }
}

impl HostSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Default location: `<data_dir>/settings.json`.
    pub fn default_path() -> PathBuf {
        crate::data_dir().join("settings.json")
    }

    /// Load from disk or return defaults.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Self>(&content) {
                Ok(settings) => {
                    tracing::info!(path = %path.display(), "loaded host settings");
                    settings
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse host settings, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to read host settings, using defaults");
                Self::default()
            }
        }
    }

    /// Save to disk (atomic write).
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        write_atomic(path, &content)?;
        tracing::debug!(path = %path.display(), "saved host settings");
        Ok(())
    }
}

/// Write `content` to `path` via a sibling temp file and rename.
///
/// Parent directories are created as needed.
pub(crate) fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
