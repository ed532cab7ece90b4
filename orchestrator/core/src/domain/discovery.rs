// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Discovery queries over the active agent population.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Duration;

use crate::domain::agent::Agent;

pub const DEFAULT_DISCOVERY_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Reputation,
    Latency,
    SuccessRate,
    TotalTasks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Every filter is optional; an empty query matches all active agents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryQuery {
    /// Agent must advertise every one of these capability ids
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Agent must advertise at least one capability in this category
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_reputation: Option<f64>,
    /// Agent qualifies if any capability is at or below this latency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<f64>,
    /// Agent must carry at least one of these tags
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub sort_by: SortKey,
    #[serde(default)]
    pub order: SortOrder,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl DiscoveryQuery {
    pub fn with_capabilities<I, S>(capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_DISCOVERY_LIMIT)
    }

    pub fn matches(&self, agent: &Agent) -> bool {
        if !self.capabilities.iter().all(|c| agent.has_capability(c)) {
            return false;
        }
        if let Some(category) = &self.category {
            if !agent.capabilities.iter().any(|c| &c.category == category) {
                return false;
            }
        }
        if let Some(min) = self.min_reputation {
            if agent.metadata.reputation < min {
                return false;
            }
        }
        if let Some(max) = self.max_latency_ms {
            if !agent.capabilities.iter().any(|c| c.performance.latency_ms <= max) {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| agent.metadata.tags.contains(t)) {
            return false;
        }
        true
    }

    /// Ordering for the selected key and direction. Ties fall back to agent id.
    pub fn compare(&self, a: &Agent, b: &Agent) -> Ordering {
        let by_key = match self.sort_by {
            SortKey::Reputation => a.metadata.reputation.total_cmp(&b.metadata.reputation),
            SortKey::Latency => a.best_latency_ms().total_cmp(&b.best_latency_ms()),
            SortKey::SuccessRate => a.metadata.success_rate.total_cmp(&b.metadata.success_rate),
            SortKey::TotalTasks => a.metadata.total_tasks.cmp(&b.metadata.total_tasks),
        };
        let by_key = match self.order {
            SortOrder::Asc => by_key,
            SortOrder::Desc => by_key.reverse(),
        };
        by_key.then_with(|| a.id.cmp(&b.id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub agents: Vec<Agent>,
    /// Match count before `limit` was applied
    pub total_found: usize,
    #[serde(with = "humantime_serde")]
    pub search_time: Duration,
}
