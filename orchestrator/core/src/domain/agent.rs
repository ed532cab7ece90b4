// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Aggregate (Membership Context)
//!
//! An [`Agent`] is an independently operating worker process that has joined the
//! swarm. Its identity is an opaque, caller-assigned string and never changes once
//! the [`crate::application::registry::MembershipRegistry`] has accepted it.
//!
//! ## Status Lifecycle
//!
//! ```text
//! register ──▶ Registering ──(first heartbeat)──▶ Active ◀──(heartbeat)── Inactive
//!                                                   │                        ▲
//!                                                   └──(missed grace window)─┘
//! Suspended is only ever entered and left through an explicit status update.
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, caller-assigned agent identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Numeric performance descriptors advertised alongside a capability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceProfile {
    /// Fraction of correct results, 0.0 - 1.0
    pub accuracy: f64,
    /// Typical response latency in milliseconds
    pub latency_ms: f64,
    /// Work items per second
    pub throughput: f64,
}

impl Default for PerformanceProfile {
    fn default() -> Self {
        Self {
            accuracy: 1.0,
            latency_ms: 0.0,
            throughput: 1.0,
        }
    }
}

/// A named, versioned skill an agent advertises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub id: String,
    pub category: String,
    pub version: String,
    #[serde(default)]
    pub performance: PerformanceProfile,
}

impl Capability {
    pub fn new(id: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            version: "1.0.0".to_string(),
            performance: PerformanceProfile::default(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_performance(mut self, performance: PerformanceProfile) -> Self {
        self.performance = performance;
        self
    }
}

/// Network endpoint an agent can be reached on. Opaque to the substrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub protocol: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub name: String,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Reputation score in [0, 1]
    pub reputation: f64,
    #[serde(default)]
    pub total_tasks: u64,
    /// Historical success rate in [0, 1]
    #[serde(default)]
    pub success_rate: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentMetadata {
    pub fn new(name: impl Into<String>, author: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            author: author.into(),
            description: None,
            tags: Vec::new(),
            reputation: 0.5,
            total_tasks: 0,
            success_rate: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_reputation(mut self, reputation: f64) -> Self {
        self.reputation = reputation;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Registering,
    Active,
    Inactive,
    Suspended,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Registering => "registering",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Suspended => "suspended",
        };
        f.write_str(s)
    }
}

/// Input to [`crate::application::registry::MembershipRegistry::register`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub id: AgentId,
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    pub metadata: AgentMetadata,
}

impl AgentRegistration {
    pub fn new(id: impl Into<AgentId>, capabilities: Vec<Capability>, metadata: AgentMetadata) -> Self {
        Self {
            id: id.into(),
            capabilities,
            endpoints: Vec::new(),
            metadata,
        }
    }

    pub fn with_endpoint(mut self, protocol: impl Into<String>, address: impl Into<String>) -> Self {
        self.endpoints.push(Endpoint {
            protocol: protocol.into(),
            address: address.into(),
        });
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub capabilities: Vec<Capability>,
    pub endpoints: Vec<Endpoint>,
    pub metadata: AgentMetadata,
    pub status: AgentStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl Agent {
    pub fn has_capability(&self, capability_id: &str) -> bool {
        self.capabilities.iter().any(|c| c.id == capability_id)
    }

    pub fn capability_ids(&self) -> Vec<String> {
        self.capabilities.iter().map(|c| c.id.clone()).collect()
    }

    /// Lowest advertised latency across all capabilities.
    pub fn best_latency_ms(&self) -> f64 {
        self.capabilities
            .iter()
            .map(|c| c.performance.latency_ms)
            .fold(f64::INFINITY, f64::min)
    }

    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }
}
