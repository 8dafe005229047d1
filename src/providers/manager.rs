//! Provider manager: the running set plus the registry, in one context.
//!
//! Owns every [`RunningProvider`]. Requests lazily start their provider; a
//! provider that was removed from the registry keeps serving until stopped.
//!
//! Lock order: `running`, then `registry`.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, MutexGuard};

use super::errors::ProviderError;
use super::lifecycle::{spawn_provider, RunningProvider, SpawnOptions, StopOutcome};
use super::logs::LogEntry;
use super::registry::Registry;
use super::types::{ListToolsResult, ProviderStatus, ToolDefinition};
use crate::config::HostSettings;

/// Registry, running set and settings shared by every provider operation.
pub struct ProviderManager {
    registry: Mutex<Registry>,
    running: Mutex<HashMap<String, Arc<RunningProvider>>>,
    settings: HostSettings,
}

impl ProviderManager {
    pub fn new(registry: Registry, settings: HostSettings) -> Self {
        Self {
            registry: Mutex::new(registry),
            running: Mutex::new(HashMap::new()),
            settings,
        }
    }

    /// Exclusive access to the registry.
    pub async fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().await
    }

    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────────

    /// Start provider `name` from its registry config.
    ///
    /// No-op if it is already running. A registered process that has exited
    /// is reaped and replaced.
    pub async fn start(&self, name: &str) -> Result<Arc<RunningProvider>, ProviderError> {
        let mut running = self.running.lock().await;
        self.start_locked(&mut running, name).await
    }

    async fn start_locked(
        &self,
        running: &mut HashMap<String, Arc<RunningProvider>>,
        name: &str,
    ) -> Result<Arc<RunningProvider>, ProviderError> {
        self.reap_if_exited(running, name).await;

        let config = {
            let registry = self.registry.lock().await;
            let config = registry
                .get(name)
                .ok_or_else(|| ProviderError::UnknownProvider { name: name.to_string() })?;
            if !config.enabled {
                return Err(ProviderError::ProviderDisabled { name: name.to_string() });
            }
            config.clone()
        };

        if let Some(existing) = running.get(name) {
            return Ok(Arc::clone(existing));
        }

        let provider = Arc::new(spawn_provider(
            &config,
            &SpawnOptions::from_settings(&self.settings),
        )?);
        running.insert(name.to_string(), Arc::clone(&provider));
        Ok(provider)
    }

    /// The live process for `name`, starting it if needed.
    async fn acquire(&self, name: &str) -> Result<Arc<RunningProvider>, ProviderError> {
        let mut running = self.running.lock().await;
        if let Some(existing) = running.get(name) {
            if !existing.has_exited().await {
                return Ok(Arc::clone(existing));
            }
        }
        self.start_locked(&mut running, name).await
    }

    /// Drop `name` from the running set if its process has exited.
    async fn reap_if_exited(&self, running: &mut HashMap<String, Arc<RunningProvider>>, name: &str) {
        let exited = match running.get(name) {
            Some(provider) => provider.has_exited().await,
            None => false,
        };
        if !exited {
            return;
        }
        if let Some(dead) = running.remove(name) {
            tracing::warn!(provider = name, "provider process exited");
            dead.shutdown(self.settings.shutdown_grace()).await;
        }
    }

    /// Drop every provider whose process has exited.
    async fn reap_exited(&self, running: &mut HashMap<String, Arc<RunningProvider>>) {
        let names: Vec<String> = running.keys().cloned().collect();
        for name in names {
            self.reap_if_exited(running, &name).await;
        }
    }

    /// Stop provider `name`. `None` if it was not running.
    pub async fn stop(&self, name: &str) -> Option<StopOutcome> {
        let provider = self.running.lock().await.remove(name)?;
        Some(provider.shutdown(self.settings.shutdown_grace()).await)
    }

    /// Stop every running provider.
    pub async fn stop_all(&self) {
        let providers: Vec<Arc<RunningProvider>> =
            self.running.lock().await.drain().map(|(_, p)| p).collect();
        if providers.is_empty() {
            return;
        }
        let grace = self.settings.shutdown_grace();
        join_all(providers.iter().map(|p| p.shutdown(grace))).await;
        tracing::info!(count = providers.len(), "stopped all providers");
    }

    /// Whether `name` has a live process. Exited processes are reaped first.
    pub async fn is_running(&self, name: &str) -> bool {
        let mut running = self.running.lock().await;
        self.reap_if_exited(&mut running, name).await;
        running.contains_key(name)
    }

    /// Names of running providers, sorted.
    pub async fn running_providers(&self) -> Vec<String> {
        let mut running = self.running.lock().await;
        self.reap_exited(&mut running).await;
        let mut names: Vec<String> = running.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every registered provider with its running state.
    pub async fn status(&self) -> Vec<ProviderStatus> {
        let mut running = self.running.lock().await;
        self.reap_exited(&mut running).await;
        let registry = self.registry.lock().await;
        registry
            .list(false)
            .into_values()
            .map(|config| {
                let process = running.get(&config.name);
                ProviderStatus {
                    running: process.is_some(),
                    pid: process.and_then(|p| p.pid()),
                    name: config.name,
                    kind: config.kind,
                    description: config.description,
                    enabled: config.enabled,
                }
            })
            .collect()
    }

    /// Captured stderr of a running provider; `tail` keeps the newest entries.
    pub async fn recent_logs(&self, name: &str, tail: Option<usize>) -> Option<Vec<LogEntry>> {
        let logs = {
            let mut running = self.running.lock().await;
            self.reap_if_exited(&mut running, name).await;
            running.get(name)?.logs()
        };
        Some(logs.snapshot(tail).await)
    }

    // ─── Protocol ────────────────────────────────────────────────────────────

    /// Send one JSON-RPC request, starting the provider if needed.
    pub async fn send_request(
        &self,
        name: &str,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, ProviderError> {
        let provider = self.acquire(name).await?;
        provider.transport().request(method, params).await
    }

    /// Send one JSON-RPC notification, starting the provider if needed.
    pub async fn notify(
        &self,
        name: &str,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ProviderError> {
        let provider = self.acquire(name).await?;
        provider.transport().notify(method, params).await
    }

    /// Run the initialize handshake.
    pub async fn initialize(&self, name: &str) -> Result<serde_json::Value, ProviderError> {
        let provider = self.acquire(name).await?;
        provider.initialize(&self.settings.client_name).await
    }

    /// Run the handshake once per process lifetime.
    pub async fn ensure_initialized(&self, name: &str) -> Result<serde_json::Value, ProviderError> {
        let provider = self.acquire(name).await?;
        let info = provider.ensure_initialized(&self.settings.client_name).await?;
        Ok(info.clone())
    }

    /// `tools/list`.
    pub async fn list_tools(&self, name: &str) -> Result<Vec<ToolDefinition>, ProviderError> {
        let result = self
            .send_request(name, "tools/list", Some(serde_json::json!({})))
            .await?;
        let list: ListToolsResult =
            serde_json::from_value(result).map_err(|e| ProviderError::MalformedResponse {
                provider: name.to_string(),
                reason: format!("invalid tools/list result: {e}"),
            })?;
        Ok(list.tools)
    }

    /// `tools/call` with `{name, arguments}`.
    pub async fn call_tool(
        &self,
        name: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let params = serde_json::json!({ "name": tool, "arguments": arguments });
        self.send_request(name, "tools/call", Some(params)).await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
