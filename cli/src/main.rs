// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # HIVE Swarm Node CLI
//!
//! The `hive` binary hosts one coordinating node of the swarm.
//!
//! ## Commands
//!
//! - `hive run` - Start the coordination substrate until Ctrl+C / SIGTERM
//! - `hive demo` - Simulate agents completing and failing tasks over the encrypted bus
//! - `hive config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use hive_core::domain::node_config::{LogFormat, ObservabilityConfig};

mod commands;
mod config_loader;

use commands::{ConfigCommand, DemoArgs};

/// HIVE - Swarm coordination substrate
#[derive(Parser)]
#[command(name = "hive")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "HIVE_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Defaults to spec.observability.log_level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordination substrate until interrupted
    #[command(name = "run")]
    Run,

    /// Run an in-process swarm simulation
    #[command(name = "demo")]
    Demo(DemoArgs),

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

    match cli.command {
        Some(Commands::Run) => {
            let loaded = config_loader::load(cli.config)?;
            init_logging(cli.log_level.as_deref(), &loaded.manifest.spec.observability)?;
            log_config_source(&loaded);
            commands::run::execute(loaded.manifest).await
        }
        Some(Commands::Demo(args)) => {
            let loaded = config_loader::load(cli.config)?;
            init_logging(cli.log_level.as_deref(), &loaded.manifest.spec.observability)?;
            log_config_source(&loaded);
            commands::demo::execute(loaded.manifest, args).await
        }
        Some(Commands::Config { command }) => {
            // Config commands must work even when the discovered file is broken
            let quiet = ObservabilityConfig {
                log_level: "warn".to_string(),
                ..ObservabilityConfig::default()
            };
            init_logging(cli.log_level.as_deref(), &quiet)?;
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

fn log_config_source(loaded: &config_loader::LoadedConfig) {
    info!("Configuration loaded from {}", loaded.source);
    for applied in &loaded.overrides {
        info!("Environment override: {}", applied);
    }
}

/// Initialize tracing subscriber for logging.
///
/// `RUST_LOG` wins over the flag, which wins over the configured level.
fn init_logging(flag_level: Option<&str>, observability: &ObservabilityConfig) -> Result<()> {
    let level = flag_level.unwrap_or(observability.log_level.as_str());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match observability.log_format {
        LogFormat::Json => builder.json().with_target(true).init(),
        LogFormat::Compact => builder.with_target(false).compact().init(),
    }

    Ok(())
}
