// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Incident commands against a running daemon
//!
//! Commands: trigger, get, reset, abort

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use vigil_core::domain::incident::{IncidentId, IncidentReport, Severity};

use crate::daemon::api::AbortStatus;
use crate::daemon::DaemonClient;

#[derive(Subcommand)]
pub enum IncidentCommand {
    /// Open an incident and start the swarm on it
    Trigger {
        /// Incident title (ignored with --file)
        #[arg(long, required_unless_present = "file")]
        title: Option<String>,

        /// sev1..sev4 (also accepts critical, high, medium, low)
        #[arg(long, default_value = "sev3")]
        severity: Severity,

        /// Free-text business impact
        #[arg(long)]
        impact: Option<String>,

        /// Log line to attach (repeatable)
        #[arg(long = "log", value_name = "LINE")]
        logs: Vec<String>,

        /// Metric sample as NAME=VALUE (repeatable)
        #[arg(long = "metric", value_name = "NAME=VALUE", value_parser = parse_metric)]
        metrics: Vec<(String, f64)>,

        /// Alert source
        #[arg(long)]
        source: Option<String>,

        /// Read the whole report from a YAML or JSON file
        #[arg(long, value_name = "FILE", conflicts_with = "title")]
        file: Option<PathBuf>,

        #[arg(long, env = "VIGIL_OPERATOR")]
        operator: String,
    },

    /// Show an incident's replayed state
    Get {
        incident_id: IncidentId,

        /// Also show per-role agent health
        #[arg(long)]
        health: bool,
    },

    /// Reset every agent's inference breaker for an incident
    Reset {
        incident_id: IncidentId,

        #[arg(long, env = "VIGIL_OPERATOR")]
        operator: String,
    },

    /// Abort the swarm and escalate to humans
    Abort {
        incident_id: IncidentId,

        #[arg(long, env = "VIGIL_OPERATOR")]
        operator: String,
    },
}

pub async fn handle_command(command: IncidentCommand, host: &str, port: u16) -> Result<()> {
    let client = DaemonClient::new(host, port)?;
    match command {
        IncidentCommand::Trigger {
            title,
            severity,
            impact,
            logs,
            metrics,
            source,
            file,
            operator,
        } => {
            let report = match file {
                Some(path) => read_report(&path)?,
                None => IncidentReport {
                    title: title.unwrap_or_default(),
                    severity,
                    business_impact: impact,
                    logs,
                    metrics: metrics.into_iter().collect(),
                    source,
                },
            };
            let incident_id = client.trigger_incident(report, &operator).await?;
            println!("{}", format!("✓ Incident triggered: {}", incident_id).green());
            Ok(())
        }
        IncidentCommand::Get { incident_id, health } => {
            let view = client.get_incident(incident_id).await?;
            print_incident(&view);
            if health {
                println!();
                println!("{}", "Agents:".bold());
                for agent in client.agent_health(incident_id).await? {
                    let mut line = format!(
                        "  {:<14} {:?} failures={}",
                        agent.role.as_str(),
                        agent.circuit_state,
                        agent.consecutive_failures
                    );
                    if let Some(latency) = agent.last_latency_ms {
                        line.push_str(&format!(" latency={}ms", latency));
                    }
                    if agent.quarantined {
                        println!("{} {}", line, "quarantined".red());
                    } else {
                        println!("{}", line);
                    }
                }
            }
            Ok(())
        }
        IncidentCommand::Reset {
            incident_id,
            operator,
        } => {
            let roles = client.reset_agents(incident_id, &operator).await?;
            let names: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
            println!("{}", format!("✓ Reset agents: {}", names.join(", ")).green());
            Ok(())
        }
        IncidentCommand::Abort {
            incident_id,
            operator,
        } => {
            match client.abort_incident(incident_id, &operator).await? {
                AbortStatus::Signalled => println!("{}", "✓ Abort signalled; the swarm will escalate".yellow()),
                AbortStatus::Escalated => println!("{}", "✓ Incident escalated".yellow()),
            }
            Ok(())
        }
    }
}

fn parse_metric(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("metric '{}' has a non-numeric value", name))?;
    Ok((name.trim().to_string(), value))
}

fn read_report(path: &Path) -> Result<IncidentReport> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let report = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)?,
        _ => serde_yaml::from_str(&content)?,
    };
    Ok(report)
}

fn print_incident(view: &serde_json::Value) {
    let incident = &view["incident"];
    let state = incident["state"].as_str().unwrap_or("UNKNOWN");
    let colored_state = match state {
        "RESOLVED" | "CLOSED" => state.green(),
        "ESCALATED" => state.red(),
        _ => state.cyan(),
    };

    println!("{}", "Incident:".bold());
    println!("  ID: {}", incident["id"].as_str().unwrap_or_default());
    println!("  Title: {}", incident["report"]["title"].as_str().unwrap_or_default());
    println!("  Severity: {}", incident["report"]["severity"].as_str().unwrap_or_default());
    println!("  State: {}", colored_state);
    println!("  Version: {}", view["version"]);
    if view["running"].as_bool().unwrap_or(false) {
        println!("  Coordinator: {}", "running".cyan());
    }
    if let Some(badge) = view["badge"].as_str() {
        println!("  Badge: {}", badge.yellow());
    }
    if let Some(reason) = incident.get("escalation").filter(|e| !e.is_null()) {
        println!("  Escalation: {}", reason);
    }

    if let Some(decisions) = incident["decisions"].as_object() {
        for (round, decision) in decisions {
            let outcome = match decision["action"].as_str() {
                Some(action) if decision["reached"].as_bool().unwrap_or(false) => action.green(),
                _ => "no consensus".red(),
            };
            println!(
                "  Consensus [{}]: {} (score {:.2})",
                round,
                outcome,
                decision["score"].as_f64().unwrap_or_default()
            );
        }
    }

    if let Some(quarantined) = incident["quarantined"].as_object() {
        for (role, reason) in quarantined {
            println!("  Quarantined {}: {}", role.red(), reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_parse_metric() {
        assert_eq!(parse_metric("error_rate=0.12").unwrap(), ("error_rate".to_string(), 0.12));
        assert!(parse_metric("error_rate").is_err());
        assert!(parse_metric("error_rate=high").is_err());
    }

    #[test]
    fn test_read_report_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.yaml");
        std::fs::write(
            &path,
            "title: Payments API 5xx spike\nseverity: sev1\nlogs:\n  - upstream connect error\nmetrics:\n  error_rate: 0.31\n",
        )
        .unwrap();

        let report = read_report(&path).unwrap();
        assert_eq!(report.severity, Severity::Sev1);
        assert_eq!(report.metrics.get("error_rate"), Some(&0.31));
        assert_eq!(report.logs.len(), 1);
    }

    #[test]
    fn test_metrics_collect_into_report_map() {
        let metrics: BTreeMap<String, f64> = vec![parse_metric("p99_ms=870").unwrap()].into_iter().collect();
        assert_eq!(metrics["p99_ms"], 870.0);
    }
}
