// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Swarm Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing one
// Vigil node:
// - coordinator timeouts, cancellation grace and fallback heuristics
// - consensus weights and thresholds
// - breaker/rate-limit tuning per dependency
// - agent resource bounds and signing keys
// - broadcast hub sizing
// - inference endpoint, knowledge base, notification channels
// - storage backend, HTTP surface and observability

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::agent::{AgentLimits, AgentRole};
use crate::domain::consensus::ConsensusConfig;
use crate::domain::dependency::{DependencyId, GuardConfig};
use crate::domain::repository::{PostgresConfig, StorageBackend};

pub const API_VERSION: &str = "vigil/v1";
pub const KIND: &str = "SwarmConfig";

/// Top-level Kubernetes-style swarm configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigManifest {
    /// API version (must be "vigil/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "SwarmConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: SwarmConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwarmConfigSpec {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub consensus: ConsensusConfig,

    #[serde(default)]
    pub dependencies: DependenciesConfig,

    #[serde(default)]
    pub agents: AgentsConfig,

    #[serde(default)]
    pub hub: HubConfig,

    /// Inference endpoint; agents degrade with `dependency_failure` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference: Option<InferenceConfig>,

    #[serde(default)]
    pub knowledge_base: KnowledgeBaseConfig,

    #[serde(default)]
    pub notifications: Vec<NotificationChannelConfig>,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub role_timeouts: RoleTimeouts,

    /// How long aborted agents get to return before being abandoned.
    #[serde(default = "default_cancel_grace", with = "humantime_serde")]
    pub cancel_grace: Duration,

    /// Bound on reread-and-retry after a version conflict.
    #[serde(default = "default_max_append_retries")]
    pub max_append_retries: u32,

    #[serde(default)]
    pub fallback: FallbackConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            role_timeouts: RoleTimeouts::default(),
            cancel_grace: default_cancel_grace(),
            max_append_retries: default_max_append_retries(),
            fallback: FallbackConfig::default(),
        }
    }
}

/// Per-role deadlines enforced by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleTimeouts {
    #[serde(default = "default_detection_timeout", with = "humantime_serde")]
    pub detection: Duration,
    #[serde(default = "default_diagnosis_timeout", with = "humantime_serde")]
    pub diagnosis: Duration,
    #[serde(default = "default_prediction_timeout", with = "humantime_serde")]
    pub prediction: Duration,
    #[serde(default = "default_resolution_timeout", with = "humantime_serde")]
    pub resolution: Duration,
    #[serde(default = "default_communication_timeout", with = "humantime_serde")]
    pub communication: Duration,
}

impl RoleTimeouts {
    pub fn for_role(&self, role: AgentRole) -> Duration {
        match role {
            AgentRole::Detection => self.detection,
            AgentRole::Diagnosis => self.diagnosis,
            AgentRole::Prediction => self.prediction,
            AgentRole::Resolution => self.resolution,
            AgentRole::Communication => self.communication,
        }
    }

    pub fn uniform(timeout: Duration) -> Self {
        Self {
            detection: timeout,
            diagnosis: timeout,
            prediction: timeout,
            resolution: timeout,
            communication: timeout,
        }
    }
}

impl Default for RoleTimeouts {
    fn default() -> Self {
        Self {
            detection: default_detection_timeout(),
            diagnosis: default_diagnosis_timeout(),
            prediction: default_prediction_timeout(),
            resolution: default_resolution_timeout(),
            communication: default_communication_timeout(),
        }
    }
}

/// Static heuristics used when a role times out with no cached action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_fallback_actions")]
    pub actions: BTreeMap<AgentRole, String>,

    #[serde(default = "default_fallback_confidence")]
    pub confidence: f64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            actions: default_fallback_actions(),
            confidence: default_fallback_confidence(),
        }
    }
}

/// Guard tuning: one default plus overrides keyed by dependency id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependenciesConfig {
    #[serde(default)]
    pub default: GuardConfig,

    /// e.g. `inference:diagnosis`, `knowledge-base`, `notify:pager`
    #[serde(default)]
    pub overrides: BTreeMap<String, GuardConfig>,
}

impl DependenciesConfig {
    pub fn for_dependency(&self, id: &DependencyId) -> GuardConfig {
        self.overrides
            .get(id.as_str())
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default)]
    pub limits: AgentLimits,

    /// HMAC keys per role (supports "env:VAR_NAME")
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub signing_keys: BTreeMap<AgentRole, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_max_subscribers")]
    pub max_subscribers: usize,

    #[serde(default = "default_shard_count")]
    pub shard_count: usize,

    #[serde(default = "default_batch_window", with = "humantime_serde")]
    pub batch_window: Duration,

    /// Backlog length that triggers shedding.
    #[serde(default = "default_backlog_threshold")]
    pub backlog_threshold: usize,

    #[serde(default = "default_heartbeat_grace", with = "humantime_serde")]
    pub heartbeat_grace: Duration,

    /// Capacity of each subscriber's outbound frame channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_subscribers: default_max_subscribers(),
            shard_count: default_shard_count(),
            batch_window: default_batch_window(),
            backlog_threshold: default_backlog_threshold(),
            heartbeat_grace: default_heartbeat_grace(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// OpenAI-compatible base URL
    pub endpoint: String,

    /// API key (supports "env:VAR_NAME" for environment variables)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseConfig {
    /// YAML or JSON list of precedents loaded at startup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precedents_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Webhook,
    Log,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationChannelConfig {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: ChannelKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_dedup_window", with = "humantime_serde")]
    pub dedup_window: Duration,

    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackendKind {
    #[default]
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackendKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::InMemory,
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

impl StorageConfig {
    pub fn to_backend(&self) -> anyhow::Result<StorageBackend> {
        match self.backend {
            StorageBackendKind::InMemory => Ok(StorageBackend::InMemory),
            StorageBackendKind::Postgres => {
                let url = self
                    .database_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("storage.database_url is required for postgres"))?;
                Ok(StorageBackend::PostgreSQL(PostgresConfig {
                    connection_string: resolve_secret(url)?,
                    max_connections: self.max_connections,
                }))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_detection_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_diagnosis_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_prediction_timeout() -> Duration {
    Duration::from_secs(150)
}

fn default_resolution_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_communication_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_cancel_grace() -> Duration {
    Duration::from_secs(3)
}

fn default_max_append_retries() -> u32 {
    5
}

fn default_fallback_actions() -> BTreeMap<AgentRole, String> {
    BTreeMap::from([
        (AgentRole::Detection, "page_oncall".to_string()),
        (AgentRole::Diagnosis, "collect_diagnostics".to_string()),
        (AgentRole::Prediction, "monitor_closely".to_string()),
        (AgentRole::Resolution, "rollback_last_change".to_string()),
        (AgentRole::Communication, "notify_stakeholders".to_string()),
    ])
}

fn default_fallback_confidence() -> f64 {
    0.2
}

fn default_max_subscribers() -> usize {
    1000
}

fn default_shard_count() -> usize {
    4
}

fn default_batch_window() -> Duration {
    Duration::from_millis(25)
}

fn default_backlog_threshold() -> usize {
    256
}

fn default_heartbeat_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_channel_capacity() -> usize {
    16
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_dedup_window() -> Duration {
    Duration::from_secs(300)
}

fn default_dedup_capacity() -> usize {
    1024
}

fn default_max_connections() -> u32 {
    10
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for NodeConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "vigil-node".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: SwarmConfigSpec::default(),
        }
    }
}

/// Resolve a secret value, supporting the "env:VAR_NAME" indirection.
pub fn resolve_secret(value: &str) -> anyhow::Result<String> {
    match value.strip_prefix("env:") {
        Some(var_name) => std::env::var(var_name)
            .map_err(|_| anyhow::anyhow!("Environment variable '{}' is not set", var_name)),
        None => Ok(value.to_string()),
    }
}

impl NodeConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. VIGIL_CONFIG_PATH environment variable
    /// 2. ./vigil-config.yaml (working directory)
    /// 3. ~/.vigil/config.yaml (user home)
    /// 4. /etc/vigil/config.yaml
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("VIGIL_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./vigil-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".vigil").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/vigil/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails loudly if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("VIGIL_DATABASE_URL") {
            tracing::info!("Environment override: VIGIL_DATABASE_URL");
            self.spec.storage.backend = StorageBackendKind::Postgres;
            self.spec.storage.database_url = Some(url);
        }

        if let Ok(endpoint) = std::env::var("VIGIL_INFERENCE_ENDPOINT") {
            tracing::info!("Environment override: VIGIL_INFERENCE_ENDPOINT={}", endpoint);
            match self.spec.inference.as_mut() {
                Some(inference) => inference.endpoint = endpoint,
                None => {
                    self.spec.inference = Some(InferenceConfig {
                        endpoint,
                        api_key: None,
                        model: std::env::var("VIGIL_INFERENCE_MODEL")
                            .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                        max_tokens: default_max_tokens(),
                        temperature: 0.0,
                    })
                }
            }
        }

        if let Ok(key) = std::env::var("VIGIL_INFERENCE_API_KEY") {
            if let Some(inference) = self.spec.inference.as_mut() {
                tracing::info!("Environment override: VIGIL_INFERENCE_API_KEY");
                inference.api_key = Some(key);
            }
        }

        if let Ok(val) = std::env::var("VIGIL_API_PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: VIGIL_API_PORT={}", port);
                    self.spec.api.port = port;
                }
                Err(_) => tracing::warn!("Invalid value for VIGIL_API_PORT: '{}'. Ignoring.", val),
            }
        }

        if let Ok(val) = std::env::var("VIGIL_REQUIRE_SIGNATURES") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => {
                    tracing::info!("Environment override: VIGIL_REQUIRE_SIGNATURES=true");
                    self.spec.consensus.require_signatures = true;
                }
                "false" | "0" | "no" | "off" => {
                    tracing::info!("Environment override: VIGIL_REQUIRE_SIGNATURES=false");
                    self.spec.consensus.require_signatures = false;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for VIGIL_REQUIRE_SIGNATURES: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let spec = &self.spec;
        for role in AgentRole::ALL {
            if spec.coordinator.role_timeouts.for_role(role).is_zero() {
                anyhow::bail!("coordinator.role_timeouts.{} must be positive", role);
            }
        }

        spec.consensus
            .validate()
            .map_err(|e| anyhow::anyhow!("consensus: {}", e))?;

        if spec.consensus.require_signatures {
            for role in [
                AgentRole::Detection,
                AgentRole::Diagnosis,
                AgentRole::Prediction,
                AgentRole::Resolution,
            ] {
                if !spec.agents.signing_keys.contains_key(&role) {
                    anyhow::bail!(
                        "consensus.require_signatures is set but agents.signing_keys.{} is missing",
                        role
                    );
                }
            }
        }

        for (name, guard) in std::iter::once(("default", &spec.dependencies.default))
            .chain(spec.dependencies.overrides.iter().map(|(k, v)| (k.as_str(), v)))
        {
            if guard.breaker.failure_threshold == 0 || guard.breaker.half_open_trials == 0 {
                anyhow::bail!("dependencies.{}: breaker thresholds must be positive", name);
            }
            if guard.rate_limit.requests_per_second == 0 || guard.rate_limit.burst == 0 {
                anyhow::bail!("dependencies.{}: rate limit must be positive", name);
            }
            for share in [guard.rate_limit.normal_share, guard.rate_limit.low_share] {
                if !(share > 0.0 && share <= 1.0) {
                    anyhow::bail!("dependencies.{}: priority shares must be within (0, 1]", name);
                }
            }
        }

        if spec.hub.max_subscribers == 0 || spec.hub.shard_count == 0 {
            anyhow::bail!("hub.max_subscribers and hub.shard_count must be positive");
        }
        if spec.hub.backlog_threshold == 0 || spec.hub.channel_capacity == 0 {
            anyhow::bail!("hub.backlog_threshold and hub.channel_capacity must be positive");
        }
        if spec.hub.batch_window.is_zero() {
            anyhow::bail!("hub.batch_window must be positive");
        }

        if let Some(inference) = &spec.inference {
            if inference.endpoint.is_empty() {
                anyhow::bail!("inference.endpoint cannot be empty");
            }
            if inference.model.is_empty() {
                anyhow::bail!("inference.model cannot be empty");
            }
        }

        for channel in &spec.notifications {
            if channel.name.is_empty() {
                anyhow::bail!("Notification channel name cannot be empty");
            }
            if channel.kind == ChannelKind::Webhook && channel.url.as_deref().unwrap_or("").is_empty() {
                anyhow::bail!("Webhook channel '{}' requires a url", channel.name);
            }
        }

        if spec.storage.backend == StorageBackendKind::Postgres && spec.storage.database_url.is_none() {
            anyhow::bail!("storage.database_url is required for the postgres backend");
        }

        Ok(())
    }
}
