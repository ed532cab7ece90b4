// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Snapshot
//!
//! [`SwarmSnapshot`] is a point-in-time summary of a node: how many agents sit in
//! each membership status, how many tasks sit in each allocation status, and the
//! channel bus counters. Status keys use the same snake_case names as the wire
//! format so the snapshot can be serialized straight into a status endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use hive_core::application::BusMetricsSnapshot;
use hive_core::domain::agent::Agent;
use hive_core::domain::task::Task;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmSnapshot {
    pub node_id: String,
    pub agents_by_status: BTreeMap<String, usize>,
    pub tasks_by_status: BTreeMap<String, usize>,
    pub bus: BusMetricsSnapshot,
    pub taken_at: DateTime<Utc>,
}

impl SwarmSnapshot {
    pub fn from_parts(node_id: impl Into<String>, agents: &[Agent], tasks: &[Task], bus: BusMetricsSnapshot) -> Self {
        let mut agents_by_status = BTreeMap::new();
        for agent in agents {
            *agents_by_status.entry(agent.status.to_string()).or_insert(0) += 1;
        }
        let mut tasks_by_status = BTreeMap::new();
        for task in tasks {
            *tasks_by_status.entry(task.status.to_string()).or_insert(0) += 1;
        }
        Self {
            node_id: node_id.into(),
            agents_by_status,
            tasks_by_status,
            bus,
            taken_at: Utc::now(),
        }
    }

    pub fn agent_count(&self, status: &str) -> usize {
        self.agents_by_status.get(status).copied().unwrap_or(0)
    }

    pub fn task_count(&self, status: &str) -> usize {
        self.tasks_by_status.get(status).copied().unwrap_or(0)
    }

    pub fn total_agents(&self) -> usize {
        self.agents_by_status.values().sum()
    }

    pub fn total_tasks(&self) -> usize {
        self.tasks_by_status.values().sum()
    }
}

impl fmt::Display for SwarmSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "node {} at {}", self.node_id, self.taken_at.to_rfc3339())?;
        writeln!(f, "agents ({}):", self.total_agents())?;
        for (status, count) in &self.agents_by_status {
            writeln!(f, "  {:<12} {}", status, count)?;
        }
        writeln!(f, "tasks ({}):", self.total_tasks())?;
        for (status, count) in &self.tasks_by_status {
            writeln!(f, "  {:<12} {}", status, count)?;
        }
        writeln!(f, "bus:")?;
        writeln!(f, "  sent         {}", self.bus.messages_sent)?;
        writeln!(f, "  received     {}", self.bus.messages_received)?;
        writeln!(f, "  bytes        {}", self.bus.bytes_transferred)?;
        writeln!(f, "  failed       {}", self.bus.failed_deliveries)?;
        writeln!(f, "  rejected     {}", self.bus.rejected_messages)?;
        writeln!(f, "  channels     {}", self.bus.active_channels)?;
        write!(f, "  latency (ms) {:.2}", self.bus.average_latency_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::domain::agent::{AgentId, AgentMetadata, AgentStatus, Capability};
    use hive_core::domain::task::{TaskId, TaskRequirement, TaskSpec, TaskStatus};

    fn agent(id: &str, status: AgentStatus) -> Agent {
        let now = Utc::now();
        Agent {
            id: AgentId::from(id),
            capabilities: vec![Capability::new("nlp", "language")],
            endpoints: vec![],
            metadata: AgentMetadata::new(id, "tests"),
            status,
            last_heartbeat: now,
            registered_at: now,
        }
    }

    fn task(status: TaskStatus) -> Task {
        let mut task = Task::from_spec(
            TaskId::new(),
            TaskSpec::new("summarise", vec![TaskRequirement::capability("nlp")]),
            Utc::now(),
        );
        task.status = status;
        task
    }

    #[test]
    fn test_counts_group_by_status() {
        let agents = vec![
            agent("a", AgentStatus::Active),
            agent("b", AgentStatus::Active),
            agent("c", AgentStatus::Inactive),
        ];
        let tasks = vec![task(TaskStatus::Pending), task(TaskStatus::InProgress), task(TaskStatus::InProgress)];

        let snapshot = SwarmSnapshot::from_parts("node-1", &agents, &tasks, BusMetricsSnapshot::default());

        assert_eq!(snapshot.agent_count("active"), 2);
        assert_eq!(snapshot.agent_count("inactive"), 1);
        assert_eq!(snapshot.agent_count("suspended"), 0);
        assert_eq!(snapshot.task_count("in_progress"), 2);
        assert_eq!(snapshot.total_agents(), 3);
        assert_eq!(snapshot.total_tasks(), 3);
    }

    #[test]
    fn test_serializes_status_keys() {
        let snapshot = SwarmSnapshot::from_parts(
            "node-1",
            &[agent("a", AgentStatus::Registering)],
            &[task(TaskStatus::Pending)],
            BusMetricsSnapshot::default(),
        );
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["agents_by_status"]["registering"], 1);
        assert_eq!(json["tasks_by_status"]["pending"], 1);
        assert!(snapshot.to_string().contains("node node-1"));
    }
}
