//! Command-line surface.
//!
//! Each subcommand maps onto one registry, manager or router operation.
//! Command functions return their output as text; [`run`] prints it and
//! stops every provider that was started along the way.

pub mod providers;
pub mod settings;
pub mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::config::HostSettings;
use crate::providers::{ProviderManager, Registry};

#[derive(Parser, Debug)]
#[command(name = "toolbridge")]
#[command(about = "Supervise stdio tool providers and route tool calls to them", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Provider config store (default: <data dir>/provider_configs.json)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List built-in provider templates
    Templates,
    /// List configured providers
    List {
        /// Include disabled providers
        #[arg(long)]
        all: bool,
    },
    /// Show every provider with its running state
    Status,
    /// Add a provider from a template
    Add {
        name: String,
        /// Template type (see `templates`)
        #[arg(value_name = "TYPE")]
        kind: String,
        /// Extra argument appended to the template's (repeatable)
        #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Environment variable for the provider, KEY=VALUE (repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
    },
    /// Add a provider with an explicit command line
    AddCustom {
        name: String,
        /// Executable to launch
        #[arg(long)]
        command: String,
        /// Argument passed to the command (repeatable)
        #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Environment variable for the provider, KEY=VALUE (repeatable)
        #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        env: Vec<(String, String)>,
        #[arg(long, default_value = "")]
        description: String,
        /// Provider type recorded in the config
        #[arg(long = "type", value_name = "TYPE", default_value = "custom")]
        kind: String,
    },
    /// Delete a provider config
    Remove { name: String },
    /// Enable a provider
    Enable { name: String },
    /// Disable a provider
    Disable { name: String },
    /// Build the tool catalog (default: every enabled provider)
    Tools {
        providers: Vec<String>,
        /// Print OpenAI function-calling definitions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Call a tool by its catalog name
    Call {
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Show host settings
    Settings {
        /// Write the current settings (defaults filled in) to disk
        #[arg(long)]
        init: bool,
    },
}

/// Parse `KEY=VALUE`. The value may itself contain `=`.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in '{s}'"))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Execute one parsed command line and print its output.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = HostSettings::load_or_default(&HostSettings::default_path());
    let store = cli.config.unwrap_or_else(Registry::default_path);
    let manager = Arc::new(ProviderManager::new(Registry::open(&store), settings));

    let result = dispatch(&manager, cli.command).await;
    manager.stop_all().await;

    print!("{}", result?);
    Ok(())
}

async fn dispatch(manager: &Arc<ProviderManager>, command: Command) -> anyhow::Result<String> {
    match command {
        Command::Templates => Ok(providers::templates()),
        Command::List { all } => Ok(providers::list(manager, all).await),
        Command::Status => Ok(providers::status(manager).await),
        Command::Add { name, kind, args, env } => {
            providers::add(manager, &name, &kind, &args, env.into_iter().collect()).await
        }
        Command::AddCustom {
            name,
            command,
            args,
            env,
            description,
            kind,
        } => {
            let config = crate::providers::ProviderConfig {
                name,
                kind,
                command,
                args,
                env_vars: env.into_iter().collect(),
                description,
                enabled: true,
            };
            Ok(providers::add_custom(manager, config).await)
        }
        Command::Remove { name } => providers::remove(manager, &name).await,
        Command::Enable { name } => providers::set_enabled(manager, &name, true).await,
        Command::Disable { name } => providers::set_enabled(manager, &name, false).await,
        Command::Tools { providers, json } => tools::list(manager, &providers, json).await,
        Command::Call { tool, args } => tools::call(manager, &tool, &args).await,
        Command::Settings { init } => {
            settings::show(manager.settings(), &HostSettings::default_path(), init)
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("STRIPE_SECRET_KEY=sk=1").unwrap(),
            ("STRIPE_SECRET_KEY".to_string(), "sk=1".to_string())
        );
        assert_eq!(parse_key_val("EMPTY=").unwrap().1, "");
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_cli_parses_add_with_hyphenated_args() {
        let cli = Cli::try_parse_from([
            "toolbridge",
            "--config",
            "/tmp/store.json",
            "add",
            "payments",
            "stripe",
            "--arg",
            "--tools=payment_links.create",
            "--env",
            "STRIPE_SECRET_KEY=sk_test",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/store.json")));
        match cli.command {
            Command::Add { name, kind, args, env } => {
                assert_eq!(name, "payments");
                assert_eq!(kind, "stripe");
                assert_eq!(args, vec!["--tools=payment_links.create"]);
                assert_eq!(env, vec![("STRIPE_SECRET_KEY".into(), "sk_test".into())]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_parses_add_custom_defaults() {
        let cli = Cli::try_parse_from([
            "toolbridge",
            "add-custom",
            "local",
            "--command",
            "python3",
            "--arg",
            "server.py",
        ])
        .unwrap();
        match cli.command {
            Command::AddCustom { kind, description, args, .. } => {
                assert_eq!(kind, "custom");
                assert!(description.is_empty());
                assert_eq!(args, vec!["server.py"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_rejects_bad_env() {
        let err = Cli::try_parse_from(["toolbridge", "add", "x", "stripe", "--env", "NOPE"]);
        assert!(err.is_err());
    }

    #[test]
    fn test_cli_global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["toolbridge", "list", "--all", "--config", "s.json"]).unwrap();
        assert!(matches!(cli.command, Command::List { all: true }));
        assert_eq!(cli.config, Some(PathBuf::from("s.json")));
    }
}
