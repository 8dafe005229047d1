//! Provider process lifecycle.
//!
//! Spawns a provider as a child process with piped stdio, wires its stdout
//! into a [`StdioTransport`] and its stderr into a [`LogMonitor`], performs
//! the initialize handshake on demand, and shuts the process down with
//! SIGTERM → grace period → SIGKILL.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, OnceCell};

use super::errors::ProviderError;
use super::logs::{LogHandle, LogMonitor};
use super::transport::{StdioTransport, TransportOptions};
use super::types::ProviderConfig;
use crate::config::HostSettings;

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Protocol revision announced in the initialize handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Provider types that receive a secret copied from a dedicated host variable.
/// The host value wins over the config value when set and non-empty.
const SECRET_INJECTIONS: &[(&str, &str)] = &[("stripe", "STRIPE_SECRET_KEY")];

// ─── Environment ─────────────────────────────────────────────────────────────

/// Variables overlaid on the inherited host environment at launch.
///
/// Config `envVars` come first, then type-specific secrets looked up through
/// `lookup` (normally `std::env::var`).
pub fn prepare_env<F>(config: &ProviderConfig, lookup: F) -> BTreeMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env = config.env_vars.clone();
    for (kind, var) in SECRET_INJECTIONS {
        if config.kind != *kind {
            continue;
        }
        if let Some(value) = lookup(var).filter(|v| !v.is_empty()) {
            env.insert((*var).to_string(), value);
        }
    }
    env
}

/// Host environment lookup used outside of tests.
pub fn host_env(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

// ─── Spawning ────────────────────────────────────────────────────────────────

/// Per-process tunables derived from [`HostSettings`].
#[derive(Debug, Clone, Copy)]
pub struct SpawnOptions {
    pub transport: TransportOptions,
    pub log_capacity: usize,
}

impl SpawnOptions {
    pub fn from_settings(settings: &HostSettings) -> Self {
        Self {
            transport: TransportOptions {
                timeout: settings.request_timeout(),
                log_context_lines: settings.log_context_lines,
            },
            log_capacity: settings.log_capacity,
        }
    }
}

/// Launch `config` as a child process. No protocol traffic happens here.
pub fn spawn_provider(
    config: &ProviderConfig,
    options: &SpawnOptions,
) -> Result<RunningProvider, ProviderError> {
    let name = config.name.as_str();
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);
    cmd.envs(prepare_env(config, host_env));

    // Windows: prevent console window from appearing for child processes
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| ProviderError::SpawnFailed {
        name: name.to_string(),
        reason: format!("{}: {e}", config.command),
    })?;

    let missing = |stream: &str| ProviderError::SpawnFailed {
        name: name.to_string(),
        reason: format!("failed to capture {stream}"),
    };
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

    let logs = LogMonitor::spawn(name, stderr, options.log_capacity);
    let transport = StdioTransport::new(name, stdin, stdout, logs.handle(), options.transport);
    let pid = child.id();

    tracing::info!(provider = name, pid, command = %config.command, "provider started");

    Ok(RunningProvider {
        name: name.to_string(),
        pid,
        process: Mutex::new(child),
        transport,
        logs,
        server_info: OnceCell::new(),
    })
}

// ─── RunningProvider ─────────────────────────────────────────────────────────

/// How [`RunningProvider::shutdown`] ended the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StopOutcome {
    /// Exited within the grace period after SIGTERM.
    Graceful,
    /// Still alive after the grace period and killed.
    Forced,
    /// Had already exited before the stop.
    AlreadyExited,
}

/// A live provider process with its transport and log monitor.
pub struct RunningProvider {
    name: String,
    pid: Option<u32>,
    process: Mutex<Child>,
    transport: StdioTransport,
    logs: LogMonitor,
    /// `initialize` result, set once per process lifetime.
    server_info: OnceCell<serde_json::Value>,
}

impl RunningProvider {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn transport(&self) -> &StdioTransport {
        &self.transport
    }

    pub fn logs(&self) -> LogHandle {
        self.logs.handle()
    }

    /// Whether the process has exited (or can no longer be queried).
    pub async fn has_exited(&self) -> bool {
        !matches!(self.process.lock().await.try_wait(), Ok(None))
    }

    /// Server info from a completed handshake, if any.
    pub fn server_info(&self) -> Option<&serde_json::Value> {
        self.server_info.get()
    }

    /// Run the initialize handshake unconditionally.
    pub async fn initialize(&self, client_name: &str) -> Result<serde_json::Value, ProviderError> {
        let result = self.handshake(client_name).await?;
        let _ = self.server_info.set(result.clone());
        Ok(result)
    }

    /// Run the handshake unless this process already completed one.
    pub async fn ensure_initialized(
        &self,
        client_name: &str,
    ) -> Result<&serde_json::Value, ProviderError> {
        self.server_info
            .get_or_try_init(|| self.handshake(client_name))
            .await
    }

    /// `initialize` followed by the `notifications/initialized` notification.
    async fn handshake(&self, client_name: &str) -> Result<serde_json::Value, ProviderError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": {
                "name": client_name,
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let result = self.transport.request("initialize", Some(params)).await?;
        self.transport
            .notify("notifications/initialized", None)
            .await?;
        tracing::debug!(provider = %self.name, "provider initialized");
        Ok(result)
    }

    /// Terminate the process and release its transport and log monitor.
    ///
    /// In-flight requests fail with "no response".
    pub async fn shutdown(&self, grace: Duration) -> StopOutcome {
        let outcome = {
            let mut child = self.process.lock().await;
            match child.try_wait() {
                Ok(Some(_)) => StopOutcome::AlreadyExited,
                _ => terminate(&self.name, &mut child, grace).await,
            }
        };

        self.transport.close();
        self.logs.stop();
        tracing::info!(provider = %self.name, outcome = ?outcome, "provider stopped");
        outcome
    }
}

impl std::fmt::Debug for RunningProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningProvider")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("initialized", &self.server_info.initialized())
            .finish()
    }
}

// ─── Termination ─────────────────────────────────────────────────────────────

/// SIGTERM, wait up to `grace`, then SIGKILL.
#[cfg(unix)]
async fn terminate(name: &str, child: &mut Child, grace: Duration) -> StopOutcome {
    let pid = child.id().and_then(|pid| i32::try_from(pid).ok());
    let Some(pid) = pid else {
        return StopOutcome::AlreadyExited;
    };

    match signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => {
            if let Ok(Ok(_)) = tokio::time::timeout(grace, child.wait()).await {
                return StopOutcome::Graceful;
            }
            tracing::warn!(
                provider = name,
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "provider ignored SIGTERM, killing"
            );
        }
        Err(nix::errno::Errno::ESRCH) => {
            let _ = child.wait().await;
            return StopOutcome::AlreadyExited;
        }
        Err(e) => {
            tracing::warn!(provider = name, error = %e, "failed to send SIGTERM");
        }
    }

    force_kill(name, child).await
}

#[cfg(not(unix))]
async fn terminate(name: &str, child: &mut Child, _grace: Duration) -> StopOutcome {
    // No SIGTERM equivalent; terminate immediately
    force_kill(name, child).await
}

async fn force_kill(name: &str, child: &mut Child) -> StopOutcome {
    if let Err(e) = child.kill().await {
        tracing::warn!(provider = name, error = %e, "failed to kill provider");
    }
    StopOutcome::Forced
}

// ─── Tests ───────────────────────────────────────────────────────────────────
