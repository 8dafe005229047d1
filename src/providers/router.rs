//! Tool router: the combined tool catalog and call dispatch.
//!
//! Every provider's tools are exposed under a globally unique name,
//! `sanitize(provider) + "_" + tool`. Each catalog build records an explicit
//! name → (provider, tool) map, so resolution never has to split names.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;

use super::errors::ProviderError;
use super::manager::ProviderManager;
use super::types::{CatalogEntry, ToolDefinition};

// ─── Naming ──────────────────────────────────────────────────────────────────

/// Replace spaces and hyphens with underscores.
pub fn sanitize_provider_name(name: &str) -> String {
    name.replace([' ', '-'], "_")
}

/// Catalog name of `tool` on `provider`.
pub fn global_tool_name(provider: &str, tool: &str) -> String {
    format!("{}_{}", sanitize_provider_name(provider), tool)
}

// ─── Catalog ─────────────────────────────────────────────────────────────────

/// Where a catalog name routes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRoute {
    pub provider: String,
    pub tool: String,
}

/// A provider (or one of its tools) left out of a catalog build.
#[derive(Debug, Clone)]
pub struct CatalogFailure {
    pub provider: String,
    pub error: ProviderError,
}

/// Result of one catalog build.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    /// Entries ordered by provider name, then provider-reported order.
    pub entries: Vec<CatalogEntry>,
    pub failures: Vec<CatalogFailure>,
}

impl Catalog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, global_name: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.global_name == global_name)
    }

    /// Entries in OpenAI function-calling format.
    pub fn to_openai_tools(&self) -> Vec<serde_json::Value> {
        self.entries
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": entry.global_name,
                        "description": entry.description,
                        "parameters": entry.input_schema,
                    }
                })
            })
            .collect()
    }

    fn routes(&self) -> BTreeMap<String, ToolRoute> {
        self.entries
            .iter()
            .map(|e| {
                let route = ToolRoute {
                    provider: e.provider.clone(),
                    tool: e.tool.clone(),
                };
                (e.global_name.clone(), route)
            })
            .collect()
    }
}

/// Merge per-provider tool lists into one catalog.
///
/// `listings` must be ordered by provider name: on a name collision the
/// earlier provider keeps the name and the later one is recorded as failed.
fn assemble(listings: Vec<(String, Result<Vec<ToolDefinition>, ProviderError>)>) -> Catalog {
    let mut catalog = Catalog::default();
    let mut owners: BTreeMap<String, String> = BTreeMap::new();

    for (provider, listing) in listings {
        let tools = match listing {
            Ok(tools) => tools,
            Err(error) => {
                tracing::warn!(provider = %provider, error = %error, "skipping provider in tool catalog");
                catalog.failures.push(CatalogFailure { provider, error });
                continue;
            }
        };

        for tool in tools {
            let global_name = global_tool_name(&provider, &tool.name);
            if let Some(existing) = owners.get(&global_name) {
                let error = ProviderError::DuplicateTool {
                    name: global_name.clone(),
                    provider: provider.clone(),
                    existing: existing.clone(),
                };
                tracing::warn!(error = %error, "duplicate tool name in catalog");
                catalog.failures.push(CatalogFailure {
                    provider: provider.clone(),
                    error,
                });
                continue;
            }
            owners.insert(global_name.clone(), provider.clone());

            catalog.entries.push(CatalogEntry {
                global_name,
                description: tool.description.unwrap_or_default(),
                input_schema: tool
                    .input_schema
                    .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
                provider: provider.clone(),
                tool: tool.name,
            });
        }
    }

    catalog
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Builds tool catalogs across providers and dispatches calls by catalog name.
pub struct ToolRouter {
    manager: Arc<ProviderManager>,
    routes: RwLock<BTreeMap<String, ToolRoute>>,
}

impl ToolRouter {
    pub fn new(manager: Arc<ProviderManager>) -> Self {
        Self {
            manager,
            routes: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn manager(&self) -> &Arc<ProviderManager> {
        &self.manager
    }

    /// Build the catalog from `providers` (default: every enabled provider).
    ///
    /// Providers are queried concurrently; one failing provider never aborts
    /// the build. The routing table is replaced with the new catalog's names.
    pub async fn build_catalog(&self, providers: Option<&[String]>) -> Catalog {
        let mut names: Vec<String> = match providers {
            Some(names) => names.to_vec(),
            None => self.manager.registry().await.list(true).into_keys().collect(),
        };
        names.sort();
        names.dedup();

        let listings = join_all(names.into_iter().map(|name| async move {
            let listing = self.list_provider_tools(&name).await;
            (name, listing)
        }))
        .await;

        let catalog = assemble(listings);
        *self.routes.write().await = catalog.routes();
        tracing::info!(
            tools = catalog.len(),
            failed = catalog.failures.len(),
            "built tool catalog"
        );
        catalog
    }

    async fn list_provider_tools(&self, name: &str) -> Result<Vec<ToolDefinition>, ProviderError> {
        self.manager.ensure_initialized(name).await?;
        self.manager.list_tools(name).await
    }

    /// Map a catalog name back to its provider and tool.
    pub async fn resolve(&self, global_name: &str) -> Result<ToolRoute, ProviderError> {
        self.routes
            .read()
            .await
            .get(global_name)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownTool {
                name: global_name.to_string(),
            })
    }

    /// Resolve `global_name` and forward the call to its provider.
    pub async fn call_tool(
        &self,
        global_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let route = self.resolve(global_name).await?;
        tracing::debug!(tool = global_name, provider = %route.provider, "routing tool call");
        self.manager
            .call_tool(&route.provider, &route.tool, arguments)
            .await
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: Some(format!("{name} tool")),
            input_schema: None,
        }
    }

    #[test]
    fn test_sanitize_provider_name() {
        assert_eq!(sanitize_provider_name("git-mcp"), "git_mcp");
        assert_eq!(sanitize_provider_name("my server-2"), "my_server_2");
        assert_eq!(sanitize_provider_name("Stripe"), "Stripe");
        assert_eq!(global_tool_name("git-mcp", "git_log"), "git_mcp_git_log");
    }

    #[test]
    fn test_assemble_routes_underscored_names_exactly() {
        // Name splitting would get both of these wrong.
        let catalog = assemble(vec![
            ("git-mcp".into(), Ok(vec![tool("log")])),
            ("git".into(), Ok(vec![tool("mcp_status")])),
        ]);
        let routes = catalog.routes();
        assert_eq!(
            routes["git_mcp_log"],
            ToolRoute { provider: "git-mcp".into(), tool: "log".into() }
        );
        assert_eq!(
            routes["git_mcp_status"],
            ToolRoute { provider: "git".into(), tool: "mcp_status".into() }
        );
    }

    #[test]
    fn test_assemble_first_provider_keeps_duplicate_name() {
        let catalog = assemble(vec![
            ("my server".into(), Ok(vec![tool("ping")])),
            ("my-server".into(), Ok(vec![tool("ping"), tool("pong")])),
        ]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("my_server_ping").unwrap().provider, "my server");
        assert_eq!(catalog.get("my_server_pong").unwrap().provider, "my-server");
        assert_eq!(catalog.failures.len(), 1);
        assert!(matches!(
            catalog.failures[0].error,
            ProviderError::DuplicateTool { ref existing, .. } if existing == "my server"
        ));
    }

    #[test]
    fn test_assemble_records_failed_providers() {
        let catalog = assemble(vec![
            ("bad".into(), Err(ProviderError::ProviderDisabled { name: "bad".into() })),
            ("good".into(), Ok(vec![tool("a")])),
        ]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.failures[0].provider, "bad");
    }

    #[test]
    fn test_openai_tools_format() {
        let catalog = assemble(vec![("Stripe".into(), Ok(vec![tool("charge")]))]);
        let tools = catalog.to_openai_tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["function"]["name"], "Stripe_charge");
        assert_eq!(tools[0]["function"]["description"], "charge tool");
        assert_eq!(tools[0]["function"]["parameters"]["type"], "object");
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::providers::registry::Registry;
        use crate::providers::test_support::{fast_settings, mock_provider, silent_provider};
        use crate::providers::types::ProviderConfig;

        fn router_with(configs: Vec<ProviderConfig>, timeout_ms: u64) -> ToolRouter {
            let mut registry = Registry::in_memory();
            for config in configs {
                registry.add_custom(config);
            }
            ToolRouter::new(Arc::new(ProviderManager::new(registry, fast_settings(timeout_ms))))
        }

        #[tokio::test]
        async fn test_end_to_end_catalog_and_call() {
            let router = router_with(vec![mock_provider("Stripe")], 3_000);

            let catalog = router.build_catalog(None).await;
            assert!(catalog.failures.is_empty(), "{:?}", catalog.failures);
            let names: Vec<&str> = catalog.entries.iter().map(|e| e.global_name.as_str()).collect();
            assert_eq!(names, vec!["Stripe_charge"]);
            assert_eq!(catalog.entries[0].input_schema["properties"]["amount"]["type"], "integer");

            let route = router.resolve("Stripe_charge").await.unwrap();
            assert_eq!(route, ToolRoute { provider: "Stripe".into(), tool: "charge".into() });

            let result = router
                .call_tool("Stripe_charge", serde_json::json!({"amount": 100}))
                .await
                .unwrap();
            assert_eq!(result["content"][0]["text"], "called charge");

            router.manager().stop_all().await;
        }

        #[tokio::test]
        async fn test_unknown_tool_is_config_error() {
            let router = router_with(vec![], 1_000);
            router.build_catalog(None).await;
            let err = router.call_tool("Stripe_refund", serde_json::json!({})).await.unwrap_err();
            assert!(matches!(err, ProviderError::UnknownTool { .. }));
            assert_eq!(err.kind(), crate::providers::ErrorKind::Config);
        }

        #[tokio::test]
        async fn test_failing_provider_does_not_abort_build() {
            let mut off = mock_provider("disabled");
            off.enabled = false;
            let router = router_with(
                vec![
                    mock_provider("alpha"),
                    ProviderConfig::custom("broken", "/nonexistent/provider-bin", vec![]),
                    silent_provider("silent"),
                    off,
                ],
                500,
            );

            let catalog = router.build_catalog(None).await;
            assert_eq!(catalog.len(), 1);
            assert!(catalog.get("alpha_charge").is_some());

            let mut failed: Vec<&str> = catalog.failures.iter().map(|f| f.provider.as_str()).collect();
            failed.sort();
            assert_eq!(failed, vec!["broken", "silent"]);
            let silent = catalog.failures.iter().find(|f| f.provider == "silent").unwrap();
            assert!(matches!(silent.error, ProviderError::Timeout { .. }), "got {:?}", silent.error);

            // explicitly requested disabled providers fail without spawning
            let catalog = router.build_catalog(Some(&["disabled".to_string()])).await;
            assert!(catalog.is_empty());
            assert!(matches!(
                catalog.failures[0].error,
                ProviderError::ProviderDisabled { .. }
            ));
            assert!(!router.manager().is_running("disabled").await);
            // the rebuilt catalog replaced the routing table
            assert!(router.resolve("alpha_charge").await.is_err());

            router.manager().stop_all().await;
        }

        #[tokio::test]
        async fn test_sanitized_name_collision_keeps_first_provider() {
            let router = router_with(vec![mock_provider("pay-svc"), mock_provider("pay svc")], 3_000);
            let catalog = router.build_catalog(None).await;

            assert_eq!(catalog.len(), 1);
            // "pay svc" sorts before "pay-svc"
            assert_eq!(catalog.entries[0].provider, "pay svc");
            assert_eq!(catalog.failures.len(), 1);
            assert_eq!(catalog.failures[0].provider, "pay-svc");
            router.manager().stop_all().await;
        }
    }
}
