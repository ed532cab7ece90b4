// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Task Allocator
//!
//! Offers tasks to eligible agents, binds accepting agents, tracks progress and
//! heals failures by resetting and re-offering the task.
//!
//! # Agent mirror
//!
//! The allocator keeps its own [`AgentRuntimeState`] per agent. Reputation,
//! capabilities and liveness are copied from the [`MembershipRegistry`] on every
//! coordination cycle (and before offering a new task); load and idle/busy
//! status are owned here. The mirror may therefore lag the registry by up to one
//! `coordination_interval`.
//!
//! # Locking
//!
//! Each task sits behind its own mutex. A task lock may be held while touching
//! an agent mirror entry, an allocation list or a history list, never the
//! reverse, and never across an `.await`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::background::spawn_periodic;
use crate::application::channel_bus::SecureChannelBus;
use crate::application::registry::MembershipRegistry;
use crate::domain::agent::{AgentId, AgentStatus};
use crate::domain::events::AllocationEvent;
use crate::domain::message::{DeliveryReceipt, Message, SwarmMessage};
use crate::domain::node_config::AllocatorConfig;
use crate::domain::task::{
    AgentRuntimeState, Allocation, AllocationRole, CoordinationKind, CoordinationRecord, RuntimeStatus, Task,
    TaskId, TaskSpec, TaskStatus,
};
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocatorError {
    #[error("Task {0} not found")]
    TaskNotFound(TaskId),

    #[error("Agent {agent_id} is not assigned to task {task_id}")]
    AgentNotAssigned { task_id: TaskId, agent_id: AgentId },

    #[error("Task {task_id} is {status}")]
    TaskNotActive { task_id: TaskId, status: TaskStatus },

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Task {0} was reassigned before the report could settle it")]
    SettlementSuperseded(TaskId),
}

/// Result of an acceptance attempt. Ignored acceptances leave no trace in task state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptanceOutcome {
    Assigned { role: AllocationRole },
    Ignored { reason: String },
}

impl AcceptanceOutcome {
    pub fn is_assigned(&self) -> bool {
        matches!(self, Self::Assigned { .. })
    }
}

/// What one coordination cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinationReport {
    pub reoffered: Vec<TaskId>,
    pub stuck: Vec<TaskId>,
}

/// Settlement decided by a progress report, tagged with the task generation it observed.
enum Settlement {
    Complete(u64),
    Fail(u64),
}

pub struct TaskAllocator {
    identity: AgentId,
    registry: Arc<MembershipRegistry>,
    bus: Arc<SecureChannelBus>,
    event_bus: EventBus,
    config: AllocatorConfig,
    tasks: DashMap<TaskId, Arc<Mutex<Task>>>,
    allocations: DashMap<TaskId, Vec<Allocation>>,
    agent_states: DashMap<AgentId, AgentRuntimeState>,
    history: DashMap<TaskId, VecDeque<CoordinationRecord>>,
}

impl TaskAllocator {
    pub fn new(
        config: AllocatorConfig,
        registry: Arc<MembershipRegistry>,
        bus: Arc<SecureChannelBus>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            identity: bus.local_identity().clone(),
            registry,
            bus,
            event_bus,
            config,
            tasks: DashMap::new(),
            allocations: DashMap::new(),
            agent_states: DashMap::new(),
            history: DashMap::new(),
        }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    fn task_handle(&self, task_id: TaskId) -> Result<Arc<Mutex<Task>>, AllocatorError> {
        self.tasks
            .get(&task_id)
            .map(|t| t.clone())
            .ok_or(AllocatorError::TaskNotFound(task_id))
    }

    fn record(&self, task_id: TaskId, agent_id: Option<&AgentId>, kind: CoordinationKind, at: DateTime<Utc>) {
        let mut records = self.history.entry(task_id).or_default();
        records.push_back(CoordinationRecord {
            task_id,
            agent_id: agent_id.cloned(),
            kind,
            at,
        });
        while records.len() > self.config.history_limit.max(1) {
            records.pop_front();
        }
    }

    async fn notify(&self, recipients: &[AgentId], message: SwarmMessage) -> Vec<DeliveryReceipt> {
        if recipients.is_empty() {
            return Vec::new();
        }
        let template = Message::new(self.identity.clone(), self.identity.clone(), message.to_payload());
        self.bus.broadcast(&template, recipients).await
    }

    /// Register a task and immediately offer it to every eligible agent.
    pub async fn register_task(&self, spec: TaskSpec) -> Result<TaskId, AllocatorError> {
        if spec.description.trim().is_empty() {
            return Err(AllocatorError::InvalidTask("description is required".to_string()));
        }
        if spec.max_concurrent_agents == 0 {
            return Err(AllocatorError::InvalidTask(
                "max_concurrent_agents must be at least 1".to_string(),
            ));
        }
        if let Some(requirement) = spec.requirements.iter().find(|r| r.capability_id.trim().is_empty()) {
            return Err(AllocatorError::InvalidTask(format!(
                "requirement with empty capability id (quantity {})",
                requirement.quantity
            )));
        }

        let now = Utc::now();
        let task_id = TaskId::new();
        let task = Task::from_spec(task_id, spec, now);
        info!(
            task_id = %task_id,
            priority = ?task.priority,
            requirements = task.requirements.len(),
            "Task registered"
        );
        self.tasks.insert(task_id, Arc::new(Mutex::new(task)));
        counter!("hive_tasks_registered_total").increment(1);
        self.event_bus.publish_allocation_event(AllocationEvent::TaskRegistered {
            task_id,
            registered_at: now,
        });

        self.refresh_agent_states_at(now);
        self.offer_task(task_id).await?;
        Ok(task_id)
    }

    /// Idle agents covering every requirement with sufficient reputation.
    fn eligible_agents(&self, task: &Task) -> Vec<AgentId> {
        let mut eligible: Vec<AgentId> = self
            .agent_states
            .iter()
            .filter(|s| {
                s.status == RuntimeStatus::Idle && s.reputation >= self.config.min_reputation && s.covers(task)
            })
            .map(|s| s.agent_id.clone())
            .collect();
        eligible.sort();
        eligible
    }

    /// Broadcast a `task_offer` to the current eligible set.
    pub async fn offer_task(&self, task_id: TaskId) -> Result<Vec<DeliveryReceipt>, AllocatorError> {
        self.offer_task_at(task_id, Utc::now()).await
    }

    async fn offer_task_at(&self, task_id: TaskId, now: DateTime<Utc>) -> Result<Vec<DeliveryReceipt>, AllocatorError> {
        let handle = self.task_handle(task_id)?;
        let (offer, recipients) = {
            let mut task = handle.lock();
            task.last_offered_at = Some(now);
            let offer = SwarmMessage::TaskOffer {
                task_id,
                description: task.description.clone(),
                requirements: task.requirements.clone(),
                priority: task.priority,
                deadline: task.deadline,
                dependencies: task.dependencies.clone(),
                max_concurrent_agents: task.max_concurrent_agents,
            };
            (offer, self.eligible_agents(&task))
        };

        if recipients.is_empty() {
            warn!(task_id = %task_id, "No eligible agents available, task stays pending");
            self.event_bus.publish_allocation_event(AllocationEvent::NoAgentsAvailable {
                task_id,
                detected_at: now,
            });
            return Ok(Vec::new());
        }

        self.record(task_id, None, CoordinationKind::Offered, now);
        let receipts = self.notify(&recipients, offer).await;
        debug!(
            task_id = %task_id,
            recipients = recipients.len(),
            delivered = receipts.iter().filter(|r| r.delivered).count(),
            "Task offered"
        );
        self.event_bus.publish_allocation_event(AllocationEvent::TaskOffered {
            task_id,
            recipients: recipients.len(),
            offered_at: now,
        });
        Ok(receipts)
    }

    /// Dispatch a peer-originated protocol message.
    ///
    /// Payloads with a `type` the allocator does not own are ignored, as are
    /// messages whose claimed `agent_id` differs from the authenticated sender.
    pub async fn handle_message(&self, message: &Message) -> Result<(), AllocatorError> {
        let Some(parsed) = SwarmMessage::from_payload(&message.payload) else {
            debug!(
                message_id = %message.id,
                message_type = message.message_type().unwrap_or("unknown"),
                "Ignoring message for other consumers"
            );
            return Ok(());
        };

        let claimed = match &parsed {
            SwarmMessage::TaskAcceptance { agent_id, .. }
            | SwarmMessage::TaskRejection { agent_id, .. }
            | SwarmMessage::ProgressUpdate { agent_id, .. }
            | SwarmMessage::CoordinationRequest { agent_id, .. } => agent_id,
            _ => {
                debug!(message_id = %message.id, "Ignoring allocator-originated message type");
                return Ok(());
            }
        };
        if claimed != &message.sender {
            warn!(
                message_id = %message.id,
                sender = %message.sender,
                claimed = %claimed,
                "Ignoring message whose agent_id does not match its sender"
            );
            return Ok(());
        }

        match parsed {
            SwarmMessage::TaskAcceptance { task_id, agent_id } => {
                self.handle_acceptance(task_id, &agent_id).await.map(|_| ())
            }
            SwarmMessage::TaskRejection {
                task_id,
                agent_id,
                reason,
            } => self.handle_rejection(task_id, &agent_id, reason),
            SwarmMessage::ProgressUpdate {
                task_id,
                agent_id,
                progress,
                status,
            } => self
                .update_progress(task_id, &agent_id, progress, status)
                .await
                .map(|_| ()),
            SwarmMessage::CoordinationRequest {
                task_id,
                agent_id,
                payload,
            } => self
                .route_coordination(task_id, &agent_id, payload)
                .await
                .map(|_| ()),
            _ => Ok(()),
        }
    }

    /// Attach `agent_id` to the task if it is open, has room and the agent is idle.
    pub async fn handle_acceptance(
        &self,
        task_id: TaskId,
        agent_id: &AgentId,
    ) -> Result<AcceptanceOutcome, AllocatorError> {
        let now = Utc::now();
        let handle = self.task_handle(task_id)?;
        if !self.agent_states.contains_key(agent_id) {
            self.sync_agent(agent_id, now);
        }

        let attached = {
            let mut task = handle.lock();
            match self.try_attach(&mut task, agent_id, now) {
                Ok(attached) => attached,
                Err(reason) => {
                    debug!(task_id = %task_id, agent_id = %agent_id, reason = %reason, "Acceptance ignored");
                    return Ok(AcceptanceOutcome::Ignored { reason });
                }
            }
        };
        let (role, started, start_recipients) = attached;

        info!(task_id = %task_id, agent_id = %agent_id, role = ?role, "Agent assigned to task");
        self.record(task_id, Some(agent_id), CoordinationKind::Accepted, now);
        self.event_bus.publish_allocation_event(AllocationEvent::AgentAssigned {
            task_id,
            agent_id: agent_id.clone(),
            assigned_at: now,
        });

        if started {
            self.record(task_id, None, CoordinationKind::Started, now);
            self.event_bus.publish_allocation_event(AllocationEvent::TaskStarted {
                task_id,
                agents: start_recipients.clone(),
                started_at: now,
            });
        }

        // Late joiners get their own start notice; running agents are not re-notified
        let assigned_agents = self.get_task(task_id).map(|t| t.assigned_agents).unwrap_or_default();
        self.notify(
            &start_recipients,
            SwarmMessage::TaskStart {
                task_id,
                assigned_agents,
            },
        )
        .await;

        Ok(AcceptanceOutcome::Assigned { role })
    }

    /// Mutating half of an acceptance, run under the task lock.
    /// Returns (role, whether the task just started, start notice recipients).
    fn try_attach(
        &self,
        task: &mut Task,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<(AllocationRole, bool, Vec<AgentId>), String> {
        if !task.status.accepts_agents() {
            return Err(format!("task is {}", task.status));
        }
        if task.is_assigned_to(agent_id) {
            return Err("agent already assigned".to_string());
        }
        if task.is_full() {
            return Err("task is full".to_string());
        }
        let expected_completion = chrono::Duration::from_std(task.estimated_duration)
            .ok()
            .and_then(|estimated| now.checked_add_signed(estimated))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        {
            let mut state = self
                .agent_states
                .get_mut(agent_id)
                .ok_or_else(|| "agent unknown to allocator".to_string())?;
            if state.status != RuntimeStatus::Idle {
                return Err(format!("agent is {:?}", state.status).to_lowercase());
            }
            state.current_load += 1;
            state.status = RuntimeStatus::Busy;
            state.last_active = now;
        }

        task.assigned_agents.push(agent_id.clone());
        if task.status == TaskStatus::Pending {
            task.status = TaskStatus::Assigned;
        }
        task.updated_at = now;

        let role = if task.assigned_agents.len() == 1 {
            AllocationRole::Primary
        } else {
            AllocationRole::Collaborator
        };
        self.allocations.entry(task.id).or_default().push(Allocation {
            task_id: task.id,
            agent_id: agent_id.clone(),
            role,
            assigned_at: now,
            expected_completion,
        });

        if task.status == TaskStatus::InProgress {
            Ok((role, false, vec![agent_id.clone()]))
        } else {
            task.status = TaskStatus::InProgress;
            task.last_progress_at = Some(now);
            Ok((role, true, task.assigned_agents.clone()))
        }
    }

    /// Record an agent declining an offer. Task state is unchanged.
    pub fn handle_rejection(
        &self,
        task_id: TaskId,
        agent_id: &AgentId,
        reason: Option<String>,
    ) -> Result<(), AllocatorError> {
        self.task_handle(task_id)?;
        let now = Utc::now();
        debug!(task_id = %task_id, agent_id = %agent_id, reason = ?reason, "Offer rejected");
        self.record(task_id, Some(agent_id), CoordinationKind::Rejected, now);
        self.event_bus.publish_allocation_event(AllocationEvent::OfferRejected {
            task_id,
            agent_id: agent_id.clone(),
            reason,
            rejected_at: now,
        });
        Ok(())
    }

    /// Apply a progress report from an assigned agent.
    ///
    /// Progress is clamped to [0, 100]. Reaching 100 or reporting `completed`
    /// settles the task; reporting `failed` resets and re-offers it.
    pub async fn update_progress(
        &self,
        task_id: TaskId,
        agent_id: &AgentId,
        progress: f64,
        status: Option<TaskStatus>,
    ) -> Result<Task, AllocatorError> {
        let now = Utc::now();
        let handle = self.task_handle(task_id)?;

        let (snapshot, settlement) = {
            let mut task = handle.lock();
            if !task.is_assigned_to(agent_id) {
                return Err(AllocatorError::AgentNotAssigned {
                    task_id,
                    agent_id: agent_id.clone(),
                });
            }
            if task.status == TaskStatus::Completed {
                return Err(AllocatorError::TaskNotActive {
                    task_id,
                    status: task.status,
                });
            }

            task.set_progress(progress);
            task.last_progress_at = Some(now);
            // A running task only leaves in_progress through settlement, so
            // non-terminal reported statuses are not applied
            task.updated_at = now;

            let settlement = if status == Some(TaskStatus::Failed) {
                Some(Settlement::Fail(task.generation))
            } else if status == Some(TaskStatus::Completed) || task.progress >= 100.0 {
                Some(Settlement::Complete(task.generation))
            } else {
                None
            };
            (task.clone(), settlement)
        };

        if let Some(mut state) = self.agent_states.get_mut(agent_id) {
            state.last_active = now;
        }
        self.record(task_id, Some(agent_id), CoordinationKind::ProgressUpdate, now);
        self.event_bus.publish_allocation_event(AllocationEvent::ProgressReported {
            task_id,
            agent_id: agent_id.clone(),
            progress: snapshot.progress,
            status: status.unwrap_or(snapshot.status),
            reported_at: now,
        });
        debug!(task_id = %task_id, agent_id = %agent_id, progress = snapshot.progress, "Progress reported");

        self.notify(
            &snapshot.assigned_agents,
            SwarmMessage::ProgressUpdate {
                task_id,
                agent_id: agent_id.clone(),
                progress: snapshot.progress,
                status,
            },
        )
        .await;

        match settlement {
            Some(Settlement::Complete(generation)) => self.settle_complete(task_id, Some(generation)).await,
            Some(Settlement::Fail(generation)) => self.settle_fail(task_id, Some(generation)).await,
            None => Ok(snapshot),
        }
    }

    /// Decrement load for each agent; agents with no remaining load become idle.
    fn release_agents(&self, agents: &[AgentId], now: DateTime<Utc>) {
        for agent_id in agents {
            if let Some(mut state) = self.agent_states.get_mut(agent_id) {
                state.current_load = state.current_load.saturating_sub(1);
                state.last_active = now;
                if state.current_load == 0 && state.status == RuntimeStatus::Busy {
                    state.status = RuntimeStatus::Idle;
                }
            }
        }
    }

    /// Refuse settling a task that is not running, or that was requeued since
    /// `observed` was read.
    fn check_settleable(task: &Task, observed: Option<u64>) -> Result<(), AllocatorError> {
        if !matches!(task.status, TaskStatus::Assigned | TaskStatus::InProgress) {
            return Err(AllocatorError::TaskNotActive {
                task_id: task.id,
                status: task.status,
            });
        }
        match observed {
            Some(generation) if generation != task.generation => Err(AllocatorError::SettlementSuperseded(task.id)),
            _ => Ok(()),
        }
    }

    /// Mark an assigned or in-progress task completed and free its agents.
    pub async fn complete_task(&self, task_id: TaskId) -> Result<Task, AllocatorError> {
        self.settle_complete(task_id, None).await
    }

    async fn settle_complete(&self, task_id: TaskId, observed: Option<u64>) -> Result<Task, AllocatorError> {
        let now = Utc::now();
        let handle = self.task_handle(task_id)?;
        let snapshot = {
            let mut task = handle.lock();
            Self::check_settleable(&task, observed)?;
            task.status = TaskStatus::Completed;
            task.updated_at = now;
            task.clone()
        };

        self.release_agents(&snapshot.assigned_agents, now);
        self.record(task_id, None, CoordinationKind::Completed, now);
        counter!("hive_tasks_completed_total").increment(1);
        info!(task_id = %task_id, agents = snapshot.assigned_agents.len(), "Task completed");
        self.event_bus.publish_allocation_event(AllocationEvent::TaskCompleted {
            task_id,
            completed_at: now,
        });

        self.notify(&snapshot.assigned_agents, SwarmMessage::TaskCompleted { task_id })
            .await;
        Ok(snapshot)
    }

    /// Free the task's agents, reset it to `pending` and offer it again.
    pub async fn fail_task(&self, task_id: TaskId) -> Result<Task, AllocatorError> {
        self.settle_fail(task_id, None).await
    }

    async fn settle_fail(&self, task_id: TaskId, observed: Option<u64>) -> Result<Task, AllocatorError> {
        let now = Utc::now();
        let handle = self.task_handle(task_id)?;
        let released = {
            let mut task = handle.lock();
            Self::check_settleable(&task, observed)?;
            task.status = TaskStatus::Failed;
            task.requeue(now)
        };

        self.release_agents(&released, now);
        self.allocations.remove(&task_id);
        self.record(task_id, None, CoordinationKind::Failed, now);
        counter!("hive_tasks_failed_total").increment(1);
        warn!(task_id = %task_id, released = released.len(), "Task failed, re-offering");
        self.event_bus.publish_allocation_event(AllocationEvent::TaskFailed {
            task_id,
            released_agents: released,
            failed_at: now,
        });

        self.offer_task(task_id).await?;
        self.get_task(task_id).ok_or(AllocatorError::TaskNotFound(task_id))
    }

    /// Relay a coordination request to the task's other assigned agents.
    pub async fn route_coordination(
        &self,
        task_id: TaskId,
        from_agent: &AgentId,
        payload: Value,
    ) -> Result<Vec<DeliveryReceipt>, AllocatorError> {
        let recipients: Vec<AgentId> = {
            let handle = self.task_handle(task_id)?;
            let task = handle.lock();
            if !task.is_assigned_to(from_agent) {
                return Err(AllocatorError::AgentNotAssigned {
                    task_id,
                    agent_id: from_agent.clone(),
                });
            }
            task.assigned_agents
                .iter()
                .filter(|a| *a != from_agent)
                .cloned()
                .collect()
        };

        let now = Utc::now();
        let receipts = self
            .notify(
                &recipients,
                SwarmMessage::CoordinationResponse {
                    task_id,
                    from_agent: from_agent.clone(),
                    payload,
                },
            )
            .await;

        self.record(task_id, Some(from_agent), CoordinationKind::CoordinationRouted, now);
        self.event_bus.publish_allocation_event(AllocationEvent::CoordinationRouted {
            task_id,
            from_agent: from_agent.clone(),
            recipients: recipients.len(),
            routed_at: now,
        });
        Ok(receipts)
    }

    fn derive_status(registry_status: AgentStatus, load: u32) -> RuntimeStatus {
        match (registry_status, load) {
            (AgentStatus::Active, 0) => RuntimeStatus::Idle,
            (AgentStatus::Active, _) => RuntimeStatus::Busy,
            _ => RuntimeStatus::Offline,
        }
    }

    /// Pull one agent from the registry into the mirror.
    fn sync_agent(&self, agent_id: &AgentId, now: DateTime<Utc>) {
        let Some(agent) = self.registry.get(agent_id) else {
            return;
        };
        let mut state = self
            .agent_states
            .entry(agent_id.clone())
            .or_insert_with(|| AgentRuntimeState {
                agent_id: agent_id.clone(),
                capabilities: Vec::new(),
                current_load: 0,
                reputation: 0.0,
                last_active: now,
                status: RuntimeStatus::Offline,
            });
        state.capabilities = agent.capability_ids();
        state.reputation = agent.metadata.reputation;
        state.last_active = state.last_active.max(agent.last_heartbeat);
        state.status = Self::derive_status(agent.status, state.current_load);
    }

    /// Rebuild the mirror from the registry.
    ///
    /// Agents that left the registry are dropped once they hold no load and
    /// stay `offline` until then.
    pub fn refresh_agent_states_at(&self, now: DateTime<Utc>) {
        let agents = self.registry.list();
        let known: HashSet<AgentId> = agents.iter().map(|a| a.id.clone()).collect();

        for agent in &agents {
            self.sync_agent(&agent.id, now);
        }

        self.agent_states.retain(|agent_id, state| {
            if known.contains(agent_id) {
                return true;
            }
            state.status = RuntimeStatus::Offline;
            state.current_load > 0
        });
    }

    pub async fn run_coordination_cycle(&self) -> CoordinationReport {
        self.run_coordination_cycle_at(Utc::now()).await
    }

    /// One coordination pass at `now`: refresh the mirror, re-offer stale
    /// pending tasks (highest priority first) and report stuck tasks.
    pub async fn run_coordination_cycle_at(&self, now: DateTime<Utc>) -> CoordinationReport {
        self.refresh_agent_states_at(now);

        let reoffer_ms = i64::try_from(self.config.pending_reoffer_after.as_millis()).unwrap_or(i64::MAX);
        let stuck_ms = i64::try_from(self.config.stuck_task_threshold.as_millis()).unwrap_or(i64::MAX);

        let mut stale_pending = Vec::new();
        let mut in_progress = Vec::new();
        for entry in self.tasks.iter() {
            let task = entry.value().lock();
            match task.status {
                TaskStatus::Pending if task.assigned_agents.is_empty() => {
                    let old_enough = (now - task.created_at).num_milliseconds() > reoffer_ms;
                    let not_recent = task
                        .last_offered_at
                        .map(|at| (now - at).num_milliseconds() >= reoffer_ms)
                        .unwrap_or(true);
                    if old_enough && not_recent {
                        stale_pending.push((task.priority, task.created_at, task.id));
                    }
                }
                TaskStatus::InProgress => {
                    in_progress.push((task.id, task.last_progress_at.unwrap_or(task.updated_at)))
                }
                _ => {}
            }
        }

        // Critical first, then oldest first
        stale_pending.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut report = CoordinationReport::default();
        for (_, _, task_id) in stale_pending {
            debug!(task_id = %task_id, "Re-offering pending task");
            if self.offer_task_at(task_id, now).await.is_ok() {
                report.reoffered.push(task_id);
            }
        }

        for (task_id, last_progress) in in_progress {
            let idle_for_ms = (now - last_progress).num_milliseconds();
            if idle_for_ms > stuck_ms {
                warn!(task_id = %task_id, idle_for_ms, "Task appears stuck");
                counter!("hive_tasks_stuck_total").increment(1);
                self.event_bus.publish_allocation_event(AllocationEvent::TaskStuck {
                    task_id,
                    idle_for_ms,
                    detected_at: now,
                });
                report.stuck.push(task_id);
            }
        }

        report
    }

    pub fn get_task(&self, task_id: TaskId) -> Option<Task> {
        self.tasks.get(&task_id).map(|t| t.lock().clone())
    }

    /// All tasks, oldest first.
    pub fn list_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.iter().map(|t| t.lock().clone()).collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    pub fn allocations(&self, task_id: TaskId) -> Vec<Allocation> {
        self.allocations
            .get(&task_id)
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    pub fn agent_state(&self, agent_id: &AgentId) -> Option<AgentRuntimeState> {
        self.agent_states.get(agent_id).map(|s| s.clone())
    }

    pub fn agent_states(&self) -> Vec<AgentRuntimeState> {
        let mut states: Vec<AgentRuntimeState> = self.agent_states.iter().map(|s| s.clone()).collect();
        states.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        states
    }

    pub fn coordination_history(&self, task_id: TaskId) -> Vec<CoordinationRecord> {
        self.history
            .get(&task_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Run the coordination cycle every `coordination_interval` until `shutdown` fires.
    pub fn spawn_coordination_cycle(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let period = self.config.coordination_interval;
        spawn_periodic("task-coordination", period, shutdown, move || {
            let allocator = self.clone();
            async move {
                let report = allocator.run_coordination_cycle().await;
                debug!(
                    reoffered = report.reoffered.len(),
                    stuck = report.stuck.len(),
                    "Coordination cycle completed"
                );
            }
        })
    }

    /// Feed verified inbound messages addressed to this node into [`Self::handle_message`].
    pub fn spawn_message_pump(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut inbound = self.bus.subscribe_inbound();
        tokio::spawn(async move {
            info!("Starting allocator message pump");
            loop {
                tokio::select! {
                    received = inbound.recv() => match received {
                        Ok(message) => {
                            if message.recipient != self.identity {
                                continue;
                            }
                            if let Err(e) = self.handle_message(&message).await {
                                warn!(message_id = %message.id, error = %e, "Failed to handle inbound message");
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!("Allocator message pump lagged by {} messages", n);
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = shutdown.cancelled() => {
                        info!("Shutdown signal received, stopping allocator message pump");
                        break;
                    }
                }
            }
        })
    }
}
