//! Registry and lifecycle commands: templates, list, status, add, remove,
//! enable/disable.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::providers::{ProviderConfig, ProviderManager, RegistryWarning, BUILTIN_TEMPLATES};

/// Built-in templates, one block per type.
pub fn templates() -> String {
    let mut out = String::new();
    for template in BUILTIN_TEMPLATES {
        let _ = writeln!(out, "{}  {}", template.kind, template.description);
        let _ = writeln!(out, "    command: {} {}", template.command, template.base_args.join(" "));
        if !template.required_env_vars.is_empty() {
            let _ = writeln!(out, "    requires: {}", template.required_env_vars.join(", "));
        }
    }
    out
}

/// Configured providers, ordered by name.
pub async fn list(manager: &ProviderManager, all: bool) -> String {
    let configs = manager.registry().await.list(!all);
    if configs.is_empty() {
        return "No providers configured.\n".to_string();
    }

    let mut out = format!("{:<20}  {:<10}  {:<8}  COMMAND\n", "NAME", "TYPE", "ENABLED");
    for config in configs.values() {
        let _ = writeln!(
            out,
            "{:<20}  {:<10}  {:<8}  {} {}",
            config.name,
            config.kind,
            if config.enabled { "yes" } else { "no" },
            config.command,
            config.args.join(" ")
        );
    }
    out
}

/// Every registered provider with its running state.
pub async fn status(manager: &ProviderManager) -> String {
    let statuses = manager.status().await;
    if statuses.is_empty() {
        return "No providers configured.\n".to_string();
    }

    let mut out = format!(
        "{:<20}  {:<10}  {:<8}  {:<8}  DESCRIPTION\n",
        "NAME", "TYPE", "ENABLED", "RUNNING"
    );
    for status in statuses {
        let running = match status.pid {
            Some(pid) if status.running => pid.to_string(),
            _ if status.running => "yes".to_string(),
            _ => "no".to_string(),
        };
        let _ = writeln!(
            out,
            "{:<20}  {:<10}  {:<8}  {:<8}  {}",
            status.name,
            status.kind,
            if status.enabled { "yes" } else { "no" },
            running,
            status.description
        );
    }
    out
}

pub async fn add(
    manager: &ProviderManager,
    name: &str,
    kind: &str,
    args: &[String],
    env: BTreeMap<String, String>,
) -> anyhow::Result<String> {
    let warnings = manager.registry().await.instantiate(name, kind, args, env)?;
    Ok(report(format!("Added provider '{name}' from template '{kind}'.\n"), &warnings))
}

pub async fn add_custom(manager: &ProviderManager, config: ProviderConfig) -> String {
    let name = config.name.clone();
    let warnings = manager.registry().await.add_custom(config);
    report(format!("Added custom provider '{name}'.\n"), &warnings)
}

pub async fn remove(manager: &ProviderManager, name: &str) -> anyhow::Result<String> {
    let warnings = manager.registry().await.remove(name)?;
    Ok(report(format!("Removed provider '{name}'.\n"), &warnings))
}

pub async fn set_enabled(
    manager: &ProviderManager,
    name: &str,
    enabled: bool,
) -> anyhow::Result<String> {
    let warnings = manager.registry().await.set_enabled(name, enabled)?;
    let verb = if enabled { "Enabled" } else { "Disabled" };
    Ok(report(format!("{verb} provider '{name}'.\n"), &warnings))
}

/// Append registry warnings to a command's confirmation line.
fn report(mut out: String, warnings: &[RegistryWarning]) -> String {
    for warning in warnings {
        let _ = writeln!(out, "warning: {warning}");
    }
    out
}

// ─── Tests ───────────────────────────────────────────────────────────────────
