// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::{AgentId, AgentStatus};
use crate::domain::task::{TaskId, TaskStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MembershipEvent {
    AgentRegistered {
        agent_id: AgentId,
        capabilities: Vec<String>,
        registered_at: DateTime<Utc>,
    },
    CapabilitiesUpdated {
        agent_id: AgentId,
        capabilities: Vec<String>,
        updated_at: DateTime<Utc>,
    },
    StatusChanged {
        agent_id: AgentId,
        from: AgentStatus,
        to: AgentStatus,
        changed_at: DateTime<Utc>,
    },
    /// Observability only: heartbeat timing deviated from the rolling average.
    HeartbeatIrregular {
        agent_id: AgentId,
        interval_ms: i64,
        average_ms: f64,
        observed_at: DateTime<Utc>,
    },
    /// Soft anomaly: a heartbeat is overdue but the grace window has not run out.
    HeartbeatMissed {
        agent_id: AgentId,
        missed: u32,
        silent_for_ms: i64,
        detected_at: DateTime<Utc>,
    },
    AgentTimedOut {
        agent_id: AgentId,
        missed: u32,
        timed_out_at: DateTime<Utc>,
    },
    AgentUnregistered {
        agent_id: AgentId,
        unregistered_at: DateTime<Utc>,
    },
}

impl MembershipEvent {
    pub fn agent_id(&self) -> &AgentId {
        match self {
            Self::AgentRegistered { agent_id, .. }
            | Self::CapabilitiesUpdated { agent_id, .. }
            | Self::StatusChanged { agent_id, .. }
            | Self::HeartbeatIrregular { agent_id, .. }
            | Self::HeartbeatMissed { agent_id, .. }
            | Self::AgentTimedOut { agent_id, .. }
            | Self::AgentUnregistered { agent_id, .. } => agent_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Explicit,
    IdleTimeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChannelEvent {
    ChannelEstablished {
        peer: AgentId,
        key_fingerprint: String,
        established_at: DateTime<Utc>,
    },
    ChannelClosed {
        peer: AgentId,
        reason: CloseReason,
        closed_at: DateTime<Utc>,
    },
    DeliveryFailed {
        peer: AgentId,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    /// Inbound message failed verification, decryption or TTL checks.
    MessageRejected {
        sender: AgentId,
        reason: String,
        rejected_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AllocationEvent {
    TaskRegistered {
        task_id: TaskId,
        registered_at: DateTime<Utc>,
    },
    TaskOffered {
        task_id: TaskId,
        recipients: usize,
        offered_at: DateTime<Utc>,
    },
    NoAgentsAvailable {
        task_id: TaskId,
        detected_at: DateTime<Utc>,
    },
    AgentAssigned {
        task_id: TaskId,
        agent_id: AgentId,
        assigned_at: DateTime<Utc>,
    },
    OfferRejected {
        task_id: TaskId,
        agent_id: AgentId,
        reason: Option<String>,
        rejected_at: DateTime<Utc>,
    },
    TaskStarted {
        task_id: TaskId,
        agents: Vec<AgentId>,
        started_at: DateTime<Utc>,
    },
    ProgressReported {
        task_id: TaskId,
        agent_id: AgentId,
        progress: f64,
        status: TaskStatus,
        reported_at: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: TaskId,
        completed_at: DateTime<Utc>,
    },
    TaskFailed {
        task_id: TaskId,
        released_agents: Vec<AgentId>,
        failed_at: DateTime<Utc>,
    },
    /// Reported only; the allocator never kills a stuck task on its own.
    TaskStuck {
        task_id: TaskId,
        idle_for_ms: i64,
        detected_at: DateTime<Utc>,
    },
    CoordinationRouted {
        task_id: TaskId,
        from_agent: AgentId,
        recipients: usize,
        routed_at: DateTime<Utc>,
    },
}

impl AllocationEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::TaskRegistered { task_id, .. }
            | Self::TaskOffered { task_id, .. }
            | Self::NoAgentsAvailable { task_id, .. }
            | Self::AgentAssigned { task_id, .. }
            | Self::OfferRejected { task_id, .. }
            | Self::TaskStarted { task_id, .. }
            | Self::ProgressReported { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskStuck { task_id, .. }
            | Self::CoordinationRouted { task_id, .. } => *task_id,
        }
    }
}
