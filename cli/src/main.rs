// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Vigil CLI
//!
//! The `vigil` binary runs the incident swarm daemon and talks to it.
//!
//! ## Commands
//!
//! - `vigil serve` - Run the daemon (HTTP/SSE surface + Prometheus exporter)
//! - `vigil incident trigger|get|reset|abort` - Operator commands against a running daemon
//! - `vigil config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use vigil::commands::{self, ConfigCommand, IncidentCommand};
use vigil::daemon::{self, DEFAULT_PORT};

/// Vigil - coordinate an incident response swarm
#[derive(Parser)]
#[command(name = "vigil")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "VIGIL_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// HTTP API port (serve: overrides api.port; clients: default 8000)
    #[arg(long, global = true, env = "VIGIL_PORT")]
    port: Option<u16>,

    /// HTTP API host (serve: overrides api.bind_address; clients: default 127.0.0.1)
    #[arg(long, global = true, env = "VIGIL_HOST")]
    host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "VIGIL_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the swarm daemon in the foreground
    #[command(name = "serve")]
    Serve,

    /// Operator commands against a running daemon
    #[command(name = "incident")]
    Incident {
        #[command(subcommand)]
        command: IncidentCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Serve => daemon::start_daemon(cli.config, cli.host, cli.port).await,
        Commands::Incident { command } => {
            let host = cli.host.as_deref().unwrap_or("127.0.0.1");
            commands::incident::handle_command(command, host, cli.port.unwrap_or(DEFAULT_PORT)).await
        }
        Commands::Config { command } => commands::config::handle_command(command, cli.config).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
