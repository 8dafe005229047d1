//! Catalog and tool-call commands.

use std::fmt::Write;
use std::sync::Arc;

use anyhow::Context;

use crate::providers::{Catalog, ProviderManager, ToolRouter};

/// Build the catalog and render it as a table, or as OpenAI tool JSON.
pub async fn list(
    manager: &Arc<ProviderManager>,
    providers: &[String],
    json: bool,
) -> anyhow::Result<String> {
    let router = ToolRouter::new(Arc::clone(manager));
    let catalog = router
        .build_catalog((!providers.is_empty()).then_some(providers))
        .await;

    if json {
        let mut out = serde_json::to_string_pretty(&catalog.to_openai_tools())?;
        out.push('\n');
        return Ok(out);
    }
    Ok(render_catalog(&catalog))
}

/// Build the catalog, then call `tool` with `args` (a JSON object).
pub async fn call(manager: &Arc<ProviderManager>, tool: &str, args: &str) -> anyhow::Result<String> {
    let arguments: serde_json::Value =
        serde_json::from_str(args).context("--args must be valid JSON")?;
    anyhow::ensure!(arguments.is_object(), "--args must be a JSON object");

    let router = ToolRouter::new(Arc::clone(manager));
    let catalog = router.build_catalog(None).await;
    if catalog.get(tool).is_none() {
        for failure in &catalog.failures {
            tracing::warn!(provider = %failure.provider, error = %failure.error, "provider unavailable for tool call");
        }
    }

    let result = router
        .call_tool(tool, arguments)
        .await
        .with_context(|| format!("tool call '{tool}' failed"))?;
    let mut out = serde_json::to_string_pretty(&result)?;
    out.push('\n');
    Ok(out)
}

fn render_catalog(catalog: &Catalog) -> String {
    let mut out = String::new();
    if catalog.is_empty() {
        out.push_str("No tools available.\n");
    }
    for entry in &catalog.entries {
        let _ = writeln!(out, "{:<40}  {}", entry.global_name, first_line(&entry.description));
    }
    for failure in &catalog.failures {
        let _ = writeln!(out, "failed: {}: {}", failure.provider, failure.error);
    }
    out
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CatalogEntry, CatalogFailure, ProviderError, Registry};
    use crate::config::HostSettings;

    #[test]
    fn test_render_catalog() {
        let catalog = Catalog {
            entries: vec![CatalogEntry {
                global_name: "Stripe_charge".into(),
                description: "Create a charge\nwith details".into(),
                input_schema: serde_json::json!({"type": "object"}),
                provider: "Stripe".into(),
                tool: "charge".into(),
            }],
            failures: vec![CatalogFailure {
                provider: "git".into(),
                error: ProviderError::ProviderDisabled { name: "git".into() },
            }],
        };
        let out = render_catalog(&catalog);
        assert!(out.starts_with("Stripe_charge"));
        assert!(out.contains("Create a charge\n"));
        assert!(!out.contains("with details"));
        assert!(out.contains("failed: git: provider 'git' is disabled"));
    }

    #[test]
    fn test_render_empty_catalog() {
        assert_eq!(render_catalog(&Catalog::default()), "No tools available.\n");
    }

    #[tokio::test]
    async fn test_call_rejects_non_object_args() {
        let manager = Arc::new(ProviderManager::new(Registry::in_memory(), HostSettings::default()));
        let err = call(&manager, "Stripe_charge", "[1, 2]").await.unwrap_err();
        assert!(err.to_string().contains("JSON object"));
        let err = call(&manager, "Stripe_charge", "{oops").await.unwrap_err();
        assert!(err.to_string().contains("valid JSON"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_list_and_call_through_mock_provider() {
        use crate::providers::test_support::{fast_settings, mock_provider};

        let mut registry = Registry::in_memory();
        registry.add_custom(mock_provider("Stripe"));
        let manager = Arc::new(ProviderManager::new(registry, fast_settings(3_000)));

        let table = list(&manager, &[], false).await.unwrap();
        assert!(table.starts_with("Stripe_charge"));

        let json = list(&manager, &["Stripe".to_string()], true).await.unwrap();
        let tools: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(tools[0]["function"]["name"], "Stripe_charge");

        let out = call(&manager, "Stripe_charge", r#"{"amount": 5}"#).await.unwrap();
        assert!(out.contains("called charge"));

        let err = call(&manager, "Stripe_refund", "{}").await.unwrap_err();
        assert!(format!("{err:#}").contains("unknown tool"));
        manager.stop_all().await;
    }
}
