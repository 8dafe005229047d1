//! Provider registry: templates and persisted provider configurations.
//!
//! The registry is the source of truth for *which* providers exist and how to
//! launch them. Every mutation rewrites the whole store file; a failed write
//! is reported as a [`RegistryWarning`] and the in-memory change stands.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use super::errors::ProviderError;
use super::lifecycle::host_env;
use super::types::{LaunchSpec, ProviderConfig, ProviderTemplate};
use crate::config::write_atomic;

/// Name and type of the provider seeded into a fresh store.
const DEFAULT_PROVIDER: &str = "stripe";

/// Built-in provider templates.
pub const BUILTIN_TEMPLATES: &[ProviderTemplate] = &[
    ProviderTemplate {
        kind: "stripe",
        command: "npx",
        base_args: &["-y", "@stripe/mcp", "--tools=all"],
        required_env_vars: &["STRIPE_SECRET_KEY"],
        description: "Stripe payment processing tools",
    },
    ProviderTemplate {
        kind: "git-mcp",
        command: "npx",
        base_args: &["-y", "git-mcp-server"],
        required_env_vars: &[],
        description: "Git repository operations and management tools",
    },
];

// ─── Warnings ────────────────────────────────────────────────────────────────

/// Non-fatal outcome of a registry mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryWarning {
    /// A template's required variables are in neither the host environment
    /// nor the supplied overrides. The provider was still created.
    MissingEnvVars {
        provider: String,
        kind: String,
        vars: Vec<String>,
    },
    /// The store file could not be written; the in-memory change stands.
    PersistFailed { path: String, reason: String },
}

impl fmt::Display for RegistryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingEnvVars { provider, kind, vars } => write!(
                f,
                "provider '{provider}' ({kind}) is missing required environment variables: {}",
                vars.join(", ")
            ),
            Self::PersistFailed { path, reason } => {
                write!(f, "failed to save provider configs to {path}: {reason}")
            }
        }
    }
}

impl RegistryWarning {
    /// The persistence failure as an error, for callers that treat it as fatal.
    pub fn into_error(self) -> Option<ProviderError> {
        match self {
            Self::PersistFailed { path, reason } => Some(ProviderError::Persistence { path, reason }),
            Self::MissingEnvVars { .. } => None,
        }
    }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Provider configurations keyed by name, optionally backed by a JSON file.
#[derive(Debug)]
pub struct Registry {
    configs: BTreeMap<String, ProviderConfig>,
    store: Option<PathBuf>,
    env_lookup: fn(&str) -> Option<String>,
}

impl Registry {
    /// Default store location: `<data_dir>/provider_configs.json`.
    pub fn default_path() -> PathBuf {
        crate::data_dir().join("provider_configs.json")
    }

    /// Open the store at `path`.
    ///
    /// A missing file seeds the default `stripe` provider and persists it.
    /// An unreadable or corrupt file yields an empty registry and is left
    /// untouched until the next mutation.
    pub fn open(path: &Path) -> Self {
        let mut registry = Self {
            configs: BTreeMap::new(),
            store: Some(path.to_path_buf()),
            env_lookup: host_env,
        };

        if path.exists() {
            match load_configs(path) {
                Ok(configs) => {
                    tracing::info!(path = %path.display(), count = configs.len(), "loaded provider configs");
                    registry.configs = configs;
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "failed to load provider configs, starting empty");
                }
            }
            return registry;
        }

        match registry.instantiate(DEFAULT_PROVIDER, DEFAULT_PROVIDER, &[], BTreeMap::new()) {
            Ok(warnings) => {
                for warning in warnings {
                    tracing::warn!(%warning, "while seeding default provider");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to seed default provider"),
        }
        registry
    }

    /// A registry with no backing file.
    pub fn in_memory() -> Self {
        Self {
            configs: BTreeMap::new(),
            store: None,
            env_lookup: host_env,
        }
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.store.as_deref()
    }

    pub fn templates(&self) -> &'static [ProviderTemplate] {
        BUILTIN_TEMPLATES
    }

    pub fn template(&self, kind: &str) -> Option<&'static ProviderTemplate> {
        BUILTIN_TEMPLATES.iter().find(|t| t.kind == kind)
    }

    /// Create (or replace) provider `name` from the `kind` template.
    ///
    /// `extra_args` are appended to the template's base args.
    pub fn instantiate(
        &mut self,
        name: &str,
        kind: &str,
        extra_args: &[String],
        env_vars: BTreeMap<String, String>,
    ) -> Result<Vec<RegistryWarning>, ProviderError> {
        let template = self
            .template(kind)
            .ok_or_else(|| ProviderError::UnknownTemplate { kind: kind.to_string() })?;

        let mut warnings = Vec::new();
        let missing: Vec<String> = template
            .required_env_vars
            .iter()
            .filter(|var| {
                let in_host = (self.env_lookup)(var).is_some_and(|v| !v.is_empty());
                !in_host && !env_vars.contains_key(**var)
            })
            .map(|var| (*var).to_string())
            .collect();
        if !missing.is_empty() {
            tracing::warn!(provider = name, kind, missing = ?missing, "missing required environment variables");
            warnings.push(RegistryWarning::MissingEnvVars {
                provider: name.to_string(),
                kind: kind.to_string(),
                vars: missing,
            });
        }

        let mut args: Vec<String> = template.base_args.iter().map(|a| (*a).to_string()).collect();
        args.extend(extra_args.iter().cloned());

        let config = ProviderConfig {
            name: name.to_string(),
            kind: kind.to_string(),
            command: template.command.to_string(),
            args,
            env_vars,
            description: template.description.to_string(),
            enabled: true,
        };
        self.configs.insert(name.to_string(), config);

        warnings.extend(self.persist());
        Ok(warnings)
    }

    /// Add (or replace) a hand-written config.
    pub fn add_custom(&mut self, config: ProviderConfig) -> Vec<RegistryWarning> {
        tracing::info!(provider = %config.name, command = %config.command, "adding custom provider");
        self.configs.insert(config.name.clone(), config);
        self.persist().into_iter().collect()
    }

    /// Delete a config. A running process is not affected.
    pub fn remove(&mut self, name: &str) -> Result<Vec<RegistryWarning>, ProviderError> {
        if self.configs.remove(name).is_none() {
            return Err(ProviderError::UnknownProvider { name: name.to_string() });
        }
        tracing::info!(provider = name, "removed provider config");
        Ok(self.persist().into_iter().collect())
    }

    pub fn set_enabled(
        &mut self,
        name: &str,
        enabled: bool,
    ) -> Result<Vec<RegistryWarning>, ProviderError> {
        let config = self
            .configs
            .get_mut(name)
            .ok_or_else(|| ProviderError::UnknownProvider { name: name.to_string() })?;
        config.enabled = enabled;
        tracing::info!(provider = name, enabled, "updated provider");
        Ok(self.persist().into_iter().collect())
    }

    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        self.configs.get(name)
    }

    /// Configs ordered by name; `enabled_only` filters out disabled ones.
    pub fn list(&self, enabled_only: bool) -> BTreeMap<String, ProviderConfig> {
        self.configs
            .iter()
            .filter(|(_, config)| !enabled_only || config.enabled)
            .map(|(name, config)| (name.clone(), config.clone()))
            .collect()
    }

    /// Names of every config, ordered.
    pub fn names(&self) -> Vec<String> {
        self.configs.keys().cloned().collect()
    }

    /// Launch triples for enabled providers, optionally limited to `names`.
    ///
    /// `None` or an empty list means every provider.
    pub fn launch_specs(&self, names: Option<&[String]>) -> BTreeMap<String, LaunchSpec> {
        let wanted = names.filter(|n| !n.is_empty());
        self.configs
            .values()
            .filter(|config| config.enabled)
            .filter(|config| wanted.map_or(true, |n| n.contains(&config.name)))
            .map(|config| {
                let spec = LaunchSpec {
                    command: config.command.clone(),
                    args: config.args.clone(),
                    env: config.env_vars.clone(),
                };
                (config.name.clone(), spec)
            })
            .collect()
    }

    /// Write every config to the store. Returns a warning on failure.
    fn persist(&self) -> Option<RegistryWarning> {
        let path = self.store.as_deref()?;
        let result = serde_json::to_string_pretty(&self.configs)
            .map_err(std::io::Error::from)
            .and_then(|content| write_atomic(path, &content));

        match result {
            Ok(()) => {
                tracing::debug!(path = %path.display(), count = self.configs.len(), "saved provider configs");
                None
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to save provider configs");
                Some(RegistryWarning::PersistFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn with_env_lookup(mut self, lookup: fn(&str) -> Option<String>) -> Self {
        self.env_lookup = lookup;
        self
    }
}

fn load_configs(path: &Path) -> Result<BTreeMap<String, ProviderConfig>, ProviderError> {
    let persistence = |reason: String| ProviderError::Persistence {
        path: path.display().to_string(),
        reason,
    };
    let content = std::fs::read_to_string(path).map_err(|e| persistence(e.to_string()))?;
    let mut configs: BTreeMap<String, ProviderConfig> =
        serde_json::from_str(&content).map_err(|e| persistence(e.to_string()))?;

    // The map key is authoritative.
    for (name, config) in configs.iter_mut() {
        if config.name != *name {
            config.name = name.clone();
        }
    }
    Ok(configs)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
