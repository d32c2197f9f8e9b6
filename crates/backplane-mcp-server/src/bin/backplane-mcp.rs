//! backplane-mcp: MCP server over stdio for MySQL, Redis and Pulsar sessions.
//!
//! ```text
//! backplane-mcp --provider mysql --disable-drop --config backplane.toml
//! ```
//!
//! Logs go to stderr; stdout carries the JSON-RPC stream.

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use backplane_mcp_protocol::ProviderType;
use backplane_mcp_providers::{compiled_providers, default_providers};
use backplane_mcp_server::{BackplaneServer, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "backplane-mcp", version, about = "MCP server for named MySQL, Redis and Pulsar sessions")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Provider to enable (repeatable). Defaults to the config file's list,
    /// then to every provider compiled in.
    #[arg(short, long = "provider", value_name = "PROVIDER")]
    providers: Vec<ProviderType>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Reject CREATE statements and create_* admin operations
    #[arg(long)]
    disable_create: bool,

    /// Reject DROP statements
    #[arg(long)]
    disable_drop: bool,

    /// Reject ALTER statements
    #[arg(long)]
    disable_alter: bool,

    /// Reject TRUNCATE statements
    #[arg(long)]
    disable_truncate: bool,

    /// Reject UPDATE/INSERT statements and state-changing Redis admin commands
    #[arg(long)]
    disable_update: bool,

    /// Reject DELETE statements, key deletion and delete_* admin operations
    #[arg(long)]
    disable_delete: bool,
}

impl Args {
    /// Security switches set on the command line, as a settings patch.
    fn security_patch(&self) -> Map<String, Value> {
        [
            ("disable_create", self.disable_create),
            ("disable_drop", self.disable_drop),
            ("disable_alter", self.disable_alter),
            ("disable_truncate", self.disable_truncate),
            ("disable_update", self.disable_update),
            ("disable_delete", self.disable_delete),
        ]
        .into_iter()
        .filter(|(_, set)| *set)
        .map(|(name, _)| (name.to_string(), Value::Bool(true)))
        .collect()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let config = match &args.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServerConfig::default(),
    };

    let enabled = if !args.providers.is_empty() {
        args.providers.clone()
    } else if let Some(providers) = &config.server.providers {
        providers.clone()
    } else {
        compiled_providers()
    };
    let providers = default_providers(&enabled);
    if providers.is_empty() {
        bail!("none of the requested providers ({:?}) are compiled into this build", enabled);
    }

    let server = BackplaneServer::builder()
        .providers(providers)
        .config(config)
        .global_settings(args.security_patch())
        .build()?;

    info!("backplane-mcp {} starting", env!("CARGO_PKG_VERSION"));
    server.run_stdio().await?;
    info!("backplane-mcp stopped");
    Ok(())
}
