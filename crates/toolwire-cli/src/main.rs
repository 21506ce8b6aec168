//! toolwire CLI: manage registered tool servers and call their tools.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use toolwire_config::{CliOverrides, ConfigStore, Settings};
use toolwire_mcp::{ConnectionManager, MemoryImagePool, StdioTransportFactory, ToolInvoker};
use toolwire_types::ServerConfig;

#[derive(Parser)]
#[command(name = "toolwire", version, about = "Manage tool servers and call their tools")]
struct Cli {
    /// Configuration directory (overrides TOOLWIRE_CONFIG_DIR)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Maximum characters of tool output to print
    #[arg(long, global = true)]
    max_result_length: Option<usize>,

    /// Bounded wait around each tool call, in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered servers and their status
    List,
    /// Register a server, replacing any existing one with the same id
    Add {
        id: String,
        command: String,
        /// Arguments passed to the server command
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        /// Environment variable for the server process (KEY=VALUE)
        #[arg(short, long = "env", value_parser = parse_key_value)]
        env: Vec<(String, String)>,
        /// Tool exempt from confirmation
        #[arg(long)]
        auto_approve: Vec<String>,
        /// Register without enabling
        #[arg(long)]
        disabled: bool,
    },
    /// Remove a server with its metadata and status
    Remove { id: String },
    /// Allow a server to be connected
    Enable { id: String },
    /// Stop a server from being connected
    Disable { id: String },
    /// Connect a server and refresh its tool listing
    Activate { id: String },
    /// Merge servers from a JSON file ({"mcpServers": {...}})
    Import { file: PathBuf },
    /// Print the configuration document
    Export,
    /// List the tools a server offers
    Tools {
        server: String,
        /// Also print each tool's input schema
        #[arg(long)]
        schema: bool,
    },
    /// Call a tool by its qualified name (server:tool)
    Call {
        name: String,
        /// Tool parameter (KEY=VALUE), may be repeated
        #[arg(short = 'p', long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
    },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let settings = Settings::load(CliOverrides {
        config_dir: cli.config_dir,
        max_result_length: cli.max_result_length,
        call_timeout_ms: cli.timeout_ms,
    })
    .context("Invalid settings")?;
    tracing::debug!(
        config_dir = %settings.config_dir.display(),
        max_result_length = settings.max_result_length,
        call_timeout_ms = settings.call_timeout_ms,
        connect_timeout_ms = settings.connect_timeout_ms,
        "Resolved settings"
    );

    let store = Arc::new(
        ConfigStore::open(settings.config_dir.clone())
            .await
            .with_context(|| format!("Failed to open {}", settings.config_dir.display()))?,
    );
    let manager = Arc::new(ConnectionManager::new(
        Arc::clone(&store),
        Arc::new(StdioTransportFactory::new(settings.request_timeout_ms)),
        Duration::from_millis(settings.connect_timeout_ms),
    ));
    let invoker = ToolInvoker::new(Arc::clone(&manager), Arc::new(MemoryImagePool::new()))
        .with_call_timeout(Duration::from_millis(settings.call_timeout_ms))
        .with_max_result_length(settings.max_result_length);

    let result = run(cli.command, &store, &invoker).await;
    manager.shutdown().await;
    result
}

async fn run(command: Command, store: &ConfigStore, invoker: &ToolInvoker) -> Result<()> {
    let manager = invoker.connections();
    match command {
        Command::List => list_servers(store),
        Command::Add {
            id,
            command,
            args,
            env,
            auto_approve,
            disabled,
        } => {
            let mut config = ServerConfig::new(command, args);
            config.env = env.into_iter().collect();
            config.auto_approve = auto_approve;
            config.disabled = disabled;
            manager
                .register_server(&id, config)
                .await
                .context("Failed to save configuration")?;
            eprintln!("Registered '{id}'.");
        }
        Command::Remove { id } => {
            if !manager.remove_server(&id).await? {
                bail!("No server named '{id}'");
            }
            eprintln!("Removed '{id}'.");
        }
        Command::Enable { id } => set_enabled(invoker, &id, true).await?,
        Command::Disable { id } => set_enabled(invoker, &id, false).await?,
        Command::Activate { id } => {
            if store.server(&id).is_none() {
                bail!("No server named '{id}'");
            }
            if manager.get_or_create_client(&id).await.is_none() {
                let reason = store
                    .server_status(&id)
                    .and_then(|s| s.error_message)
                    .unwrap_or_else(|| "server is disabled".to_string());
                bail!("Could not activate '{id}': {reason}");
            }
            let tools = invoker.list_tools(&id).await?;
            eprintln!("'{id}' is active with {} tools.", tools.len());
        }
        Command::Import { file } => {
            let doc = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let count = store
                .merge_from_json(&doc)
                .await
                .with_context(|| format!("Failed to import {}", file.display()))?;
            eprintln!("Imported {count} servers.");
        }
        Command::Export => println!("{}", store.export_json()?),
        Command::Tools { server, schema } => {
            let tools = invoker.list_tools(&server).await?;
            if tools.is_empty() {
                eprintln!("'{server}' offers no tools.");
            }
            for tool in &tools {
                println!("{}:{}  {}", server, tool.name, tool.description);
                if schema {
                    println!("{}", serde_json::to_string_pretty(&tool.input_schema)?);
                }
            }
        }
        Command::Call { name, params } => {
            let params: HashMap<String, String> = params.into_iter().collect();
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    trigger.cancel();
                }
            });

            let result = invoker.invoke_with_cancel(&name, params, cancel).await;
            if !result.success {
                bail!("{}", result.message);
            }
            println!("{}", result.message);
        }
    }
    Ok(())
}

fn list_servers(store: &ConfigStore) {
    let ids = store.server_ids();
    if ids.is_empty() {
        eprintln!("No servers registered.");
        return;
    }
    for id in ids {
        let Some(config) = store.server(&id) else {
            continue;
        };
        let name = store.metadata(&id).map(|m| m.name).unwrap_or_default();
        let status = store.server_status(&id);
        let state = if config.disabled {
            "disabled"
        } else if status.as_ref().is_some_and(|s| s.active) {
            "active"
        } else {
            "inactive"
        };
        println!(
            "{id:<20} {state:<9} {name:<24} {} {}",
            config.command,
            config.args.join(" ")
        );
        if let Some(error) = status.and_then(|s| s.error_message) {
            println!("{:<20} last error: {error}", "");
        }
    }
}

async fn set_enabled(invoker: &ToolInvoker, id: &str, enabled: bool) -> Result<()> {
    if !invoker.connections().set_server_enabled(id, enabled).await? {
        bail!("No server named '{id}'");
    }
    let verb = if enabled { "Enabled" } else { "Disabled" };
    eprintln!("{verb} '{id}'.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_pairs() {
        assert_eq!(
            parse_key_value("query=a=b").unwrap(),
            ("query".to_string(), "a=b".to_string())
        );
        assert_eq!(parse_key_value("empty=").unwrap().1, "");
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn add_keeps_hyphenated_server_args() {
        let cli = Cli::try_parse_from([
            "toolwire", "add", "-e", "ROOT=/tmp", "files", "npx", "-y", "server-fs",
        ])
        .unwrap();
        let Command::Add { args, env, .. } = cli.command else {
            panic!("expected add");
        };
        assert_eq!(env, vec![("ROOT".to_string(), "/tmp".to_string())]);
        assert_eq!(args, vec!["-y".to_string(), "server-fs".to_string()]);
    }

    #[test]
    fn call_collects_params() {
        let cli = Cli::try_parse_from([
            "toolwire", "call", "files:read", "-p", "path=/a", "-p", "limit=10",
        ])
        .unwrap();
        let Command::Call { name, params } = cli.command else {
            panic!("expected call");
        };
        assert_eq!(name, "files:read");
        assert_eq!(params.len(), 2);
    }
}
