// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Application Layer
//!
//! [`SwarmService`] is the use-case surface of a node; [`SwarmRuntime`] is the
//! in-process implementation that owns the core services and their background
//! work.

mod runtime;

pub use runtime::SwarmRuntime;

use anyhow::Result;
use async_trait::async_trait;

use hive_core::application::BusMetricsSnapshot;
use hive_core::domain::agent::{Agent, AgentId, AgentRegistration, AgentStatus, Capability};
use hive_core::domain::discovery::{DiscoveryQuery, DiscoveryResult};
use hive_core::domain::message::{DeliveryReceipt, Message};
use hive_core::domain::task::{Task, TaskId, TaskSpec, TaskStatus};

#[async_trait]
pub trait SwarmService: Send + Sync {
    async fn register_agent(&self, registration: AgentRegistration) -> Result<Agent>;
    async fn heartbeat(&self, agent_id: &AgentId) -> Result<Agent>;
    async fn update_status(&self, agent_id: &AgentId, status: AgentStatus) -> Result<Agent>;
    async fn update_capabilities(&self, agent_id: &AgentId, capabilities: Vec<Capability>) -> Result<Agent>;
    async fn unregister_agent(&self, agent_id: &AgentId) -> Result<Agent>;
    async fn discover(&self, query: DiscoveryQuery) -> Result<DiscoveryResult>;
    async fn send_message(&self, message: Message) -> Result<DeliveryReceipt>;
    async fn submit_task(&self, spec: TaskSpec) -> Result<TaskId>;
    async fn report_progress(
        &self,
        task_id: TaskId,
        agent_id: &AgentId,
        progress: f64,
        status: Option<TaskStatus>,
    ) -> Result<Task>;
    async fn get_task(&self, task_id: TaskId) -> Result<Option<Task>>;
    async fn bus_metrics(&self) -> Result<BusMetricsSnapshot>;
}
