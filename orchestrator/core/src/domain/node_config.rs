// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Node Configuration Types
//
// Defines the configuration schema for a HIVE coordinating node:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Node identity
// - Membership registry liveness timing
// - Secure channel liveness and delivery bounds
// - Task allocator coordination cycle
// - Observability settings
//
// Services take their typed section through their constructor. File discovery and
// environment overrides belong to the binary, not to this crate.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const API_VERSION: &str = "100monkeys.ai/v1";
pub const KIND: &str = "SwarmNodeConfig";

/// Top-level Kubernetes-style node configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfigManifest {
    /// API version (must be "100monkeys.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "SwarmNodeConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: NodeConfigSpec,
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
pub struct NodeConfigSpec {
    #[serde(default)]
    pub node: NodeIdentity,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub channels: ChannelConfig,

    #[serde(default)]
    pub allocator: AllocatorConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Identity the coordinator signs and sends as
    pub id: String,
}

impl Default for NodeIdentity {
    fn default() -> Self {
        Self {
            id: "hive-coordinator".to_string(),
        }
    }
}

/// Membership registry liveness timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Expected heartbeat cadence; also the liveness sweep period
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    /// Hard ceiling: silence longer than this demotes an agent on the next sweep
    #[serde(with = "humantime_serde", default = "default_health_check_timeout")]
    pub health_check_timeout: Duration,

    /// Slack added to the heartbeat interval before a beat counts as missed
    #[serde(with = "humantime_serde", default = "default_jitter_tolerance")]
    pub jitter_tolerance: Duration,

    /// Consecutive missed sweeps before an agent becomes inactive
    #[serde(default = "default_grace_misses")]
    pub grace_misses: u32,

    /// Number of heartbeat intervals kept per agent for irregularity detection
    #[serde(default = "default_heartbeat_history")]
    pub heartbeat_history: usize,

    /// Relative deviation from the rolling average flagged as irregular
    #[serde(default = "default_irregularity_threshold")]
    pub irregularity_threshold: f64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            health_check_timeout: default_health_check_timeout(),
            jitter_tolerance: default_jitter_tolerance(),
            grace_misses: default_grace_misses(),
            heartbeat_history: default_heartbeat_history(),
            irregularity_threshold: default_irregularity_threshold(),
        }
    }
}

/// Secure channel liveness and delivery bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel liveness sweep period
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    /// A channel idle for `heartbeat_interval * idle_multiplier` is closed
    #[serde(default = "default_idle_multiplier")]
    pub idle_multiplier: u32,

    #[serde(with = "humantime_serde", default = "default_handshake_timeout")]
    pub handshake_timeout: Duration,

    #[serde(with = "humantime_serde", default = "default_delivery_timeout")]
    pub delivery_timeout: Duration,

    /// Capacity of the inbound message broadcast channel
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
}

impl ChannelConfig {
    /// Saturates at `Duration::MAX`.
    pub fn idle_timeout(&self) -> Duration {
        self.heartbeat_interval
            .checked_mul(self.idle_multiplier)
            .unwrap_or(Duration::MAX)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            idle_multiplier: default_idle_multiplier(),
            handshake_timeout: default_handshake_timeout(),
            delivery_timeout: default_delivery_timeout(),
            inbound_capacity: default_inbound_capacity(),
        }
    }
}

/// Task allocator coordination cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    #[serde(with = "humantime_serde", default = "default_coordination_interval")]
    pub coordination_interval: Duration,

    /// In-progress tasks silent for longer than this are reported as stuck
    #[serde(with = "humantime_serde", default = "default_stuck_task_threshold")]
    pub stuck_task_threshold: Duration,

    /// Pending tasks without agents are re-offered after this long
    #[serde(with = "humantime_serde", default = "default_pending_reoffer_after")]
    pub pending_reoffer_after: Duration,

    /// Minimum registry reputation for an agent to receive offers
    #[serde(default = "default_min_reputation")]
    pub min_reputation: f64,

    /// Coordination records kept per task; the oldest are dropped first
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            coordination_interval: default_coordination_interval(),
            stuck_task_threshold: default_stuck_task_threshold(),
            pending_reoffer_after: default_pending_reoffer_after(),
            min_reputation: default_min_reputation(),
            history_limit: default_history_limit(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Prometheus exporter port; exporter disabled when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            metrics_port: None,
        }
    }
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_health_check_timeout() -> Duration {
    Duration::from_secs(90)
}

fn default_jitter_tolerance() -> Duration {
    Duration::from_secs(5)
}

fn default_grace_misses() -> u32 {
    2
}

fn default_heartbeat_history() -> usize {
    10
}

fn default_irregularity_threshold() -> f64 {
    0.5
}

fn default_idle_multiplier() -> u32 {
    3
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_delivery_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_inbound_capacity() -> usize {
    1024
}

fn default_coordination_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_stuck_task_threshold() -> Duration {
    Duration::from_secs(300)
}

fn default_pending_reoffer_after() -> Duration {
    Duration::from_secs(30)
}

fn default_min_reputation() -> f64 {
    0.5
}

fn default_history_limit() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "hive-node".to_string(),
                version: None,
                labels: None,
            },
            spec: NodeConfigSpec::default(),
        }
    }
}

impl NodeConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.node.id.trim().is_empty() {
            anyhow::bail!("spec.node.id cannot be empty");
        }

        let registry = &self.spec.registry;
        if registry.heartbeat_interval.is_zero() {
            anyhow::bail!("spec.registry.heartbeat_interval must be greater than zero");
        }
        if registry.grace_misses == 0 {
            anyhow::bail!("spec.registry.grace_misses must be at least 1");
        }
        if registry.heartbeat_history == 0 {
            anyhow::bail!("spec.registry.heartbeat_history must be at least 1");
        }
        if registry.irregularity_threshold <= 0.0 {
            anyhow::bail!("spec.registry.irregularity_threshold must be positive");
        }
        if registry.health_check_timeout < registry.heartbeat_interval.saturating_add(registry.jitter_tolerance) {
            anyhow::bail!(
                "spec.registry.health_check_timeout ({:?}) must cover heartbeat_interval + jitter_tolerance",
                registry.health_check_timeout
            );
        }

        let channels = &self.spec.channels;
        if channels.heartbeat_interval.is_zero() {
            anyhow::bail!("spec.channels.heartbeat_interval must be greater than zero");
        }
        if channels.idle_multiplier == 0 {
            anyhow::bail!("spec.channels.idle_multiplier must be at least 1");
        }
        if channels.inbound_capacity == 0 {
            anyhow::bail!("spec.channels.inbound_capacity must be at least 1");
        }

        let allocator = &self.spec.allocator;
        if allocator.coordination_interval.is_zero() {
            anyhow::bail!("spec.allocator.coordination_interval must be greater than zero");
        }
        if !(0.0..=1.0).contains(&allocator.min_reputation) {
            anyhow::bail!(
                "spec.allocator.min_reputation must be within [0, 1], got {}",
                allocator.min_reputation
            );
        }
        if allocator.history_limit == 0 {
            anyhow::bail!("spec.allocator.history_limit must be at least 1");
        }

        Ok(())
    }
}
