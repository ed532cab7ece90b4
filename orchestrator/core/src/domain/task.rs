// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Aggregate (Allocation Context)
//!
//! Tasks move through a small state graph owned by the
//! [`crate::application::allocator::TaskAllocator`]:
//!
//! ```text
//! Pending ──▶ Assigned ──▶ InProgress ──▶ Completed
//!    ▲                         │
//!    └──────── Failed ◀────────┘   (reset: agents cleared, progress 0, re-offered)
//! ```
//!
//! ## Invariants
//!
//! - `assigned_agents.len() <= max_concurrent_agents` at all times.
//! - `progress` is clamped to [0, 100] but not forced to be monotonic.
//! - `Failed → Pending` is the only back-edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::agent::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    /// States in which the task can still take on agents.
    pub fn accepts_agents(&self) -> bool {
        matches!(self, Self::Pending | Self::Assigned | Self::InProgress)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequirement {
    pub capability_id: String,
    /// Minimum performance threshold, carried in offers for agents to self-select on
    #[serde(default)]
    pub min_performance: f64,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

impl TaskRequirement {
    pub fn capability(capability_id: impl Into<String>) -> Self {
        Self {
            capability_id: capability_id.into(),
            min_performance: 0.0,
            quantity: 1,
        }
    }
}

fn default_quantity() -> u32 {
    1
}

/// Input to [`crate::application::allocator::TaskAllocator::register_task`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub description: String,
    pub requirements: Vec<TaskRequirement>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    #[serde(with = "humantime_serde", default = "default_estimated_duration")]
    pub estimated_duration: Duration,
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: u32,
}

impl TaskSpec {
    pub fn new(description: impl Into<String>, requirements: Vec<TaskRequirement>) -> Self {
        Self {
            description: description.into(),
            requirements,
            priority: TaskPriority::Normal,
            deadline: None,
            dependencies: Vec::new(),
            estimated_duration: default_estimated_duration(),
            max_concurrent_agents: default_max_concurrent_agents(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_concurrent_agents(mut self, max: u32) -> Self {
        self.max_concurrent_agents = max;
        self
    }

    pub fn with_estimated_duration(mut self, duration: Duration) -> Self {
        self.estimated_duration = duration;
        self
    }
}

fn default_estimated_duration() -> Duration {
    Duration::from_secs(300)
}

fn default_max_concurrent_agents() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub requirements: Vec<TaskRequirement>,
    pub priority: TaskPriority,
    pub deadline: Option<DateTime<Utc>>,
    pub dependencies: Vec<TaskId>,
    #[serde(with = "humantime_serde")]
    pub estimated_duration: Duration,
    pub max_concurrent_agents: u32,
    pub status: TaskStatus,
    /// Percent complete, 0 - 100
    pub progress: f64,
    pub assigned_agents: Vec<AgentId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_offered_at: Option<DateTime<Utc>>,
    /// Start or latest progress report of the current assignment
    pub last_progress_at: Option<DateTime<Utc>>,
    /// Bumped on every requeue
    pub generation: u64,
}

impl Task {
    pub fn from_spec(id: TaskId, spec: TaskSpec, now: DateTime<Utc>) -> Self {
        Self {
            id,
            description: spec.description,
            requirements: spec.requirements,
            priority: spec.priority,
            deadline: spec.deadline,
            dependencies: spec.dependencies,
            estimated_duration: spec.estimated_duration,
            max_concurrent_agents: spec.max_concurrent_agents,
            status: TaskStatus::Pending,
            progress: 0.0,
            assigned_agents: Vec::new(),
            created_at: now,
            updated_at: now,
            last_offered_at: None,
            last_progress_at: None,
            generation: 0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.assigned_agents.len() >= self.max_concurrent_agents as usize
    }

    pub fn is_assigned_to(&self, agent_id: &AgentId) -> bool {
        self.assigned_agents.contains(agent_id)
    }

    pub fn required_capabilities(&self) -> impl Iterator<Item = &str> {
        self.requirements.iter().map(|r| r.capability_id.as_str())
    }

    /// Clamp and store a reported progress value. Lower values overwrite higher ones.
    pub fn set_progress(&mut self, progress: f64) {
        self.progress = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 100.0) };
    }

    /// Reset for reassignment after a failure.
    pub fn requeue(&mut self, now: DateTime<Utc>) -> Vec<AgentId> {
        self.status = TaskStatus::Pending;
        self.progress = 0.0;
        self.updated_at = now;
        self.last_offered_at = None;
        self.last_progress_at = None;
        self.generation += 1;
        std::mem::take(&mut self.assigned_agents)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationRole {
    Primary,
    Collaborator,
}

/// Binding of one agent to one task. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub role: AllocationRole,
    pub assigned_at: DateTime<Utc>,
    pub expected_completion: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeStatus {
    Idle,
    Busy,
    Offline,
}

/// Allocator-local view of an agent.
///
/// This is a cache refreshed from the registry once per coordination cycle, so it
/// may lag the registry by up to one `coordination_interval`. The allocator owns
/// `current_load` and `status`; reputation and capabilities are copied in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRuntimeState {
    pub agent_id: AgentId,
    pub capabilities: Vec<String>,
    pub current_load: u32,
    pub reputation: f64,
    pub last_active: DateTime<Utc>,
    pub status: RuntimeStatus,
}

impl AgentRuntimeState {
    pub fn covers(&self, task: &Task) -> bool {
        task.required_capabilities()
            .all(|required| self.capabilities.iter().any(|c| c == required))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationKind {
    Offered,
    Accepted,
    Rejected,
    Started,
    ProgressUpdate,
    CoordinationRouted,
    Completed,
    Failed,
}

/// One entry of a task's coordination history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationRecord {
    pub task_id: TaskId,
    pub agent_id: Option<AgentId>,
    pub kind: CoordinationKind,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_clamped_not_monotonic() {
        let mut task = Task::from_spec(TaskId::new(), TaskSpec::new("t", vec![]), Utc::now());
        task.set_progress(140.0);
        assert_eq!(task.progress, 100.0);
        task.set_progress(30.0);
        assert_eq!(task.progress, 30.0);
        task.set_progress(-5.0);
        assert_eq!(task.progress, 0.0);
    }

    #[test]
    fn test_requeue_clears_assignment() {
        let mut task = Task::from_spec(TaskId::new(), TaskSpec::new("t", vec![]), Utc::now());
        task.status = TaskStatus::InProgress;
        task.progress = 40.0;
        task.assigned_agents.push(AgentId::from("a"));
        task.last_progress_at = Some(Utc::now());

        let released = task.requeue(Utc::now());

        assert_eq!(released, vec![AgentId::from("a")]);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0.0);
        assert!(task.assigned_agents.is_empty());
        assert!(task.last_progress_at.is_none());
        assert_eq!(task.generation, 1);
    }

    #[test]
    fn test_runtime_state_covers_all_requirements() {
        let task = Task::from_spec(
            TaskId::new(),
            TaskSpec::new("t", vec![TaskRequirement::capability("nlp"), TaskRequirement::capability("ocr")]),
            Utc::now(),
        );
        let mut state = AgentRuntimeState {
            agent_id: AgentId::from("a"),
            capabilities: vec!["nlp".to_string()],
            current_load: 0,
            reputation: 0.9,
            last_active: Utc::now(),
            status: RuntimeStatus::Idle,
        };
        assert!(!state.covers(&task));
        state.capabilities.push("ocr".to_string());
        assert!(state.covers(&task));
    }

    #[test]
    fn test_task_spec_defaults_from_json() {
        let spec: TaskSpec = serde_json::from_str(
            r#"{"description":"summarise","requirements":[{"capability_id":"nlp"}]}"#,
        )
        .unwrap();
        assert_eq!(spec.max_concurrent_agents, 1);
        assert_eq!(spec.priority, TaskPriority::Normal);
        assert_eq!(spec.requirements[0].quantity, 1);
        assert_eq!(spec.estimated_duration, Duration::from_secs(300));
    }
}
