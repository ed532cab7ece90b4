// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use crate::config_loader::{self, CONFIG_PATH_ENV};

const TEMPLATE: &str = include_str!("../../templates/hive-config.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective manifest as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./hive-config.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, force } => generate(output, force),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        if std::env::var(CONFIG_PATH_ENV).is_err() {
            println!("     {}: {}", CONFIG_PATH_ENV, "(not set)".dimmed());
        }
        for (i, path) in config_loader::candidate_paths().iter().enumerate() {
            let marker = if path.exists() { "found".green() } else { "missing".dimmed() };
            println!("  {}. {} ({})", i + 2, path.display(), marker);
        }
        println!();
    }

    let loaded = config_loader::load(config_override).context("Failed to load configuration")?;
    let manifest = &loaded.manifest;

    if as_yaml {
        print!("{}", serde_yaml::to_string(manifest)?);
        return Ok(());
    }

    println!("{} {}", "Source:".bold(), loaded.source);
    for applied in &loaded.overrides {
        println!("  override {}", applied);
    }
    println!();

    println!("{}", "Node:".bold());
    println!("  Name: {}", manifest.metadata.name);
    println!("  ID: {}", manifest.spec.node.id);
    println!();

    let registry = &manifest.spec.registry;
    println!("{}", "Membership Registry:".bold());
    println!("  Heartbeat interval: {:?}", registry.heartbeat_interval);
    println!("  Health-check timeout: {:?}", registry.health_check_timeout);
    println!("  Jitter tolerance: {:?}", registry.jitter_tolerance);
    println!("  Grace misses: {}", registry.grace_misses);
    println!();

    let channels = &manifest.spec.channels;
    println!("{}", "Secure Channels:".bold());
    println!("  Heartbeat interval: {:?}", channels.heartbeat_interval);
    println!("  Idle timeout: {:?}", channels.idle_timeout());
    println!("  Handshake timeout: {:?}", channels.handshake_timeout);
    println!("  Delivery timeout: {:?}", channels.delivery_timeout);
    println!();

    let allocator = &manifest.spec.allocator;
    println!("{}", "Task Allocator:".bold());
    println!("  Coordination interval: {:?}", allocator.coordination_interval);
    println!("  Stuck-task threshold: {:?}", allocator.stuck_task_threshold);
    println!("  Pending re-offer after: {:?}", allocator.pending_reoffer_after);
    println!("  Minimum reputation: {}", allocator.min_reputation);
    println!("  History limit: {} records per task", allocator.history_limit);
    println!();

    let observability = &manifest.spec.observability;
    println!("{}", "Observability:".bold());
    println!("  Log level: {}", observability.log_level);
    println!("  Log format: {:?}", observability.log_format);
    match observability.metrics_port {
        Some(port) => println!("  Metrics: 0.0.0.0:{}", port),
        None => println!("  Metrics: {}", "(disabled)".dimmed()),
    }
    println!();

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let loaded = config_loader::load(config_path).context("Failed to load configuration")?;
    loaded
        .manifest
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", format!("✓ Configuration is valid ({})", loaded.source).green());

    Ok(())
}

fn generate(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }

    std::fs::write(&output, TEMPLATE).with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::domain::node_config::NodeConfigManifest;

    #[test]
    fn test_generate_writes_loadable_template() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("hive-config.yaml");

        generate(output.clone(), false).unwrap();
        let manifest = NodeConfigManifest::from_yaml_file(&output).unwrap();
        manifest.validate().unwrap();

        // Refuses to clobber without --force
        assert!(generate(output.clone(), false).is_err());
        generate(output, true).unwrap();
    }

    #[test]
    fn test_validate_reports_bad_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(
            &path,
            "apiVersion: 100monkeys.ai/v1\nkind: AgentManifest\nmetadata:\n  name: bad\n",
        )
        .unwrap();

        assert!(validate(Some(path)).is_err());
    }
}
