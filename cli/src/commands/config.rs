// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vigil_core::domain::node_config::{
    ChannelKind, InferenceConfig, NodeConfigManifest, NotificationChannelConfig,
};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
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
        #[arg(short, long, default_value = "./vigil-config.yaml")]
        output: PathBuf,

        /// Include an inference endpoint and notification channels
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, examples } => generate(&output, examples),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config =
        NodeConfigManifest::load_or_default(config_override.clone()).context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. VIGIL_CONFIG_PATH: {}",
            std::env::var("VIGIL_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./vigil-config.yaml");
        println!("  4. ~/.vigil/config.yaml");
        println!("  5. /etc/vigil/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Node:".bold());
    println!("  Name: {}", config.metadata.name);
    if let Some(version) = &config.metadata.version {
        println!("  Version: {}", version);
    }
    println!("  API: {}:{}", spec.api.bind_address, spec.api.port);
    println!("  Storage: {:?}", spec.storage.backend);
    println!();

    println!("{}", "Coordinator:".bold());
    let timeouts = &spec.coordinator.role_timeouts;
    println!(
        "  Timeouts: detection {}s, diagnosis {}s, prediction {}s, resolution {}s, communication {}s",
        timeouts.detection.as_secs(),
        timeouts.diagnosis.as_secs(),
        timeouts.prediction.as_secs(),
        timeouts.resolution.as_secs(),
        timeouts.communication.as_secs()
    );
    println!("  Cancel grace: {}ms", spec.coordinator.cancel_grace.as_millis());
    println!();

    println!("{}", "Consensus:".bold());
    for (role, weight) in &spec.consensus.weights {
        println!("  {:<14} weight {:.2}", role.as_str(), weight);
    }
    println!(
        "  Acceptance {:.2}, quorum weight {:.2}, outlier k {:.1}",
        spec.consensus.acceptance_threshold, spec.consensus.quorum_weight, spec.consensus.outlier_k
    );
    println!(
        "  Signatures: {}",
        if spec.consensus.require_signatures {
            "required".green()
        } else {
            "optional".yellow()
        }
    );
    println!();

    println!("{}", "Inference:".bold());
    match &spec.inference {
        Some(inference) => println!("  {} ({})", inference.endpoint, inference.model),
        None => println!("  {}", "(not configured; agents will degrade)".yellow()),
    }
    println!();

    println!("{}", "Notification channels:".bold());
    if spec.notifications.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for channel in &spec.notifications {
        println!(
            "  {} ({:?}) dedup {}s",
            channel.name.bold(),
            channel.kind,
            channel.dedup_window.as_secs()
        );
    }
    println!();

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = NodeConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: &Path, with_examples: bool) -> Result<()> {
    let mut config = NodeConfigManifest::default();
    if with_examples {
        config.spec.inference = Some(InferenceConfig {
            endpoint: "http://localhost:11434/v1".to_string(),
            api_key: Some("env:VIGIL_INFERENCE_API_KEY".to_string()),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1024,
            temperature: 0.0,
        });
        config.spec.notifications = vec![
            NotificationChannelConfig {
                name: "ops-log".to_string(),
                kind: ChannelKind::Log,
                url: None,
                dedup_window: Duration::from_secs(300),
                dedup_capacity: 1024,
            },
            NotificationChannelConfig {
                name: "pager".to_string(),
                kind: ChannelKind::Webhook,
                url: Some("https://hooks.example.com/vigil".to_string()),
                dedup_window: Duration::from_secs(300),
                dedup_capacity: 1024,
            },
        ];
    }

    config
        .to_yaml_file(output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());

    Ok(())
}
