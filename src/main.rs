//! # NeWarp Harness CLI (`newarp`)
//!
//! ## Usage
//!
//! ```bash
//! newarp --config ./config/newarp.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `newarp query <tool> [value]` | Run one lookup and print its envelope |
//! | `newarp serve tools` | Start the HTTP + MCP tool server |
//! | `newarp serve chat` | Start the chat relay |
//! | `newarp cache status` | List cached datasets |
//! | `newarp cache clear` | Remove every cached dataset |
//!
//! Logging goes to stderr and follows `RUST_LOG` (default `info`).

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use newarp_harness::cache::{CacheStore, FsCache};
use newarp_harness::chat;
use newarp_harness::config::{self, ChatConfig};
use newarp_harness::engine::Engine;
use newarp_harness::server;
use newarp_harness::tools::{validate_params, Lookup, ToolContext, ToolRegistry};

/// NeWarp Harness: query tools over the NeWarp organization system.
#[derive(Parser)]
#[command(
    name = "newarp",
    about = "NeWarp Harness: organization, user and evaluation lookups with a chat relay",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/newarp.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one lookup and print its JSON envelope.
    ///
    /// Tool names: get_company_organization_master, get_division_master,
    /// get_department_master, get_group_master, get_user_master_user_name,
    /// get_user_master_group_short_name, get_user_evaluation.
    Query {
        /// Tool name.
        tool: String,
        /// Value of the tool's single parameter (short name or user name).
        value: Option<String>,
    },

    /// Start a server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },

    /// Inspect or reset the dataset cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// HTTP + MCP tool server on `[server].bind`.
    Tools,
    /// Chat relay on `[chat].bind`.
    Chat,
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached datasets with size and write time.
    Status,
    /// Remove every cached dataset; the next query refetches.
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // The relay only needs [chat]; run it on defaults when no config exists.
    if let Commands::Serve {
        service: ServeService::Chat,
    } = &cli.command
    {
        let chat_config = match config::load_config(&cli.config) {
            Ok(cfg) => cfg.chat,
            Err(e) => {
                tracing::warn!(error = %e, "no usable config, using chat defaults");
                ChatConfig::default().with_env_overrides()
            }
        };
        return chat::run_chat(chat_config).await;
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Query { tool, value } => {
            let engine = Arc::new(Engine::from_config(&cfg)?);
            let result = run_query(engine, &tool, value).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Serve { service } => match service {
            ServeService::Tools => server::run_server(&cfg).await?,
            ServeService::Chat => chat::run_chat(cfg.chat).await?,
        },
        Commands::Cache { action } => {
            let cache = FsCache::new(cfg.cache.dir.clone());
            match action {
                CacheAction::Status => print_cache_status(&cache).await?,
                CacheAction::Clear => {
                    let removed = cache.clear().await?;
                    println!(
                        "Removed {} cache entries from {}",
                        removed,
                        cache.dir().display()
                    );
                }
            }
        }
    }

    Ok(())
}

async fn run_query(
    engine: Arc<Engine>,
    tool_name: &str,
    value: Option<String>,
) -> anyhow::Result<Value> {
    let registry = ToolRegistry::with_builtins();
    let Some(tool) = registry.find(tool_name) else {
        let names: Vec<&str> = registry.tools().iter().map(|t| t.name()).collect();
        bail!("unknown tool '{}'. Available: {}", tool_name, names.join(", "));
    };

    let mut params = Map::new();
    if let Some(param) = Lookup::from_tool_name(tool_name).and_then(|l| l.parameter()) {
        let value =
            value.with_context(|| format!("{} requires a {} value", tool_name, param.name))?;
        params.insert(param.name.to_string(), json!(value));
    }

    let params = validate_params(&tool.parameters_schema(), &Value::Object(params))?;
    tool.execute(params, &ToolContext::new(engine)).await
}

async fn print_cache_status(cache: &FsCache) -> anyhow::Result<()> {
    let entries = cache.entries().await?;
    if entries.is_empty() {
        println!("Cache at {} is empty.", cache.dir().display());
        return Ok(());
    }

    println!("{:<40} {:>10}  WRITTEN", "ENTRY", "BYTES");
    for entry in &entries {
        println!(
            "{:<40} {:>10}  {}",
            entry.name,
            entry.bytes,
            entry.written_at.as_deref().unwrap_or("-")
        );
    }
    println!("{} entries in {}", entries.len(), cache.dir().display());
    Ok(())
}
