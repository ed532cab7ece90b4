// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Runtime
//!
//! Builds the membership registry, secure channel bus and task allocator from a
//! [`NodeConfigManifest`] and runs their background work:
//!
//! | Task | Period |
//! |------|--------|
//! | membership liveness sweep | `spec.registry.heartbeat_interval` |
//! | idle channel sweep | `spec.channels.heartbeat_interval` |
//! | coordination cycle | `spec.allocator.coordination_interval` |
//! | allocator message pump | on every verified inbound message |
//!
//! All four stop on one shared `CancellationToken`.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hive_core::application::{BusMetricsSnapshot, MembershipRegistry, SecureChannelBus, TaskAllocator};
use hive_core::domain::agent::{Agent, AgentId, AgentRegistration, AgentStatus, Capability};
use hive_core::domain::discovery::{DiscoveryQuery, DiscoveryResult};
use hive_core::domain::message::{DeliveryReceipt, Message};
use hive_core::domain::node_config::NodeConfigManifest;
use hive_core::domain::task::{Task, TaskId, TaskSpec, TaskStatus};
use hive_core::infrastructure::{EventBus, MessageTransport};

use super::SwarmService;
use crate::domain::SwarmSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

pub struct SwarmRuntime {
    config: NodeConfigManifest,
    event_bus: EventBus,
    registry: Arc<MembershipRegistry>,
    bus: Arc<SecureChannelBus>,
    allocator: Arc<TaskAllocator>,
    shutdown: CancellationToken,
    lifecycle: Mutex<Lifecycle>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SwarmRuntime {
    /// Validate the manifest and wire the core services. Nothing runs until [`Self::start`].
    pub fn new(config: &NodeConfigManifest, transport: Arc<dyn MessageTransport>) -> Result<Self> {
        config.validate().context("Invalid node configuration")?;

        let spec = &config.spec;
        let event_bus = EventBus::with_default_capacity();
        let registry = Arc::new(MembershipRegistry::new(spec.registry.clone(), event_bus.clone()));
        let bus = Arc::new(SecureChannelBus::new(
            AgentId::new(spec.node.id.clone()),
            spec.channels.clone(),
            registry.clone(),
            transport,
            event_bus.clone(),
        ));
        let allocator = Arc::new(TaskAllocator::new(
            spec.allocator.clone(),
            registry.clone(),
            bus.clone(),
            event_bus.clone(),
        ));

        Ok(Self {
            config: config.clone(),
            event_bus,
            registry,
            bus,
            allocator,
            shutdown: CancellationToken::new(),
            lifecycle: Mutex::new(Lifecycle::Created),
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn node_id(&self) -> &AgentId {
        self.bus.local_identity()
    }

    pub fn config(&self) -> &NodeConfigManifest {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn registry(&self) -> &Arc<MembershipRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<SecureChannelBus> {
        &self.bus
    }

    pub fn allocator(&self) -> &Arc<TaskAllocator> {
        &self.allocator
    }

    pub fn is_running(&self) -> bool {
        *self.lifecycle.lock() == Lifecycle::Running
    }

    /// Spawn the sweeps and the message pump. A runtime can be started once.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Created => {}
            Lifecycle::Running => bail!("swarm runtime {} is already running", self.node_id()),
            Lifecycle::Stopped => bail!("swarm runtime {} has been shut down", self.node_id()),
        }

        let handles = vec![
            self.allocator.clone().spawn_message_pump(self.shutdown.clone()),
            self.registry.clone().spawn_liveness_monitor(self.shutdown.clone()),
            self.bus.clone().spawn_liveness_monitor(self.shutdown.clone()),
            self.allocator.clone().spawn_coordination_cycle(self.shutdown.clone()),
        ];
        self.handles.lock().extend(handles);
        *lifecycle = Lifecycle::Running;

        info!(node_id = %self.node_id(), "Swarm runtime started");
        Ok(())
    }

    /// Cancel background work and wait for every task to exit.
    pub async fn shutdown(&self) {
        {
            let mut lifecycle = self.lifecycle.lock();
            if *lifecycle == Lifecycle::Stopped {
                return;
            }
            *lifecycle = Lifecycle::Stopped;
        }
        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!(node_id = %self.node_id(), "Swarm runtime stopped");
    }

    pub fn snapshot(&self) -> SwarmSnapshot {
        SwarmSnapshot::from_parts(
            self.node_id().as_str(),
            &self.registry.list(),
            &self.allocator.list_tasks(),
            self.bus.metrics(),
        )
    }
}

#[async_trait]
impl SwarmService for SwarmRuntime {
    async fn register_agent(&self, registration: AgentRegistration) -> Result<Agent> {
        Ok(self.registry.register(registration)?)
    }

    async fn heartbeat(&self, agent_id: &AgentId) -> Result<Agent> {
        Ok(self.registry.record_heartbeat(agent_id)?)
    }

    async fn update_status(&self, agent_id: &AgentId, status: AgentStatus) -> Result<Agent> {
        Ok(self.registry.update_status(agent_id, status)?)
    }

    async fn update_capabilities(&self, agent_id: &AgentId, capabilities: Vec<Capability>) -> Result<Agent> {
        Ok(self.registry.update_capabilities(agent_id, capabilities)?)
    }

    async fn unregister_agent(&self, agent_id: &AgentId) -> Result<Agent> {
        let agent = self.registry.unregister(agent_id)?;
        self.bus.close(agent_id);
        Ok(agent)
    }

    async fn discover(&self, query: DiscoveryQuery) -> Result<DiscoveryResult> {
        Ok(self.registry.discover(&query))
    }

    async fn send_message(&self, message: Message) -> Result<DeliveryReceipt> {
        Ok(self.bus.send(message).await)
    }

    async fn submit_task(&self, spec: TaskSpec) -> Result<TaskId> {
        Ok(self.allocator.register_task(spec).await?)
    }

    async fn report_progress(
        &self,
        task_id: TaskId,
        agent_id: &AgentId,
        progress: f64,
        status: Option<TaskStatus>,
    ) -> Result<Task> {
        Ok(self.allocator.update_progress(task_id, agent_id, progress, status).await?)
    }

    async fn get_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        Ok(self.allocator.get_task(task_id))
    }

    async fn bus_metrics(&self) -> Result<BusMetricsSnapshot> {
        Ok(self.bus.metrics())
    }
}

impl Drop for SwarmRuntime {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::infrastructure::InMemoryTransport;

    fn runtime() -> SwarmRuntime {
        SwarmRuntime::new(&NodeConfigManifest::default(), Arc::new(InMemoryTransport::new())).unwrap()
    }

    #[test]
    fn test_rejects_invalid_manifest() {
        let mut config = NodeConfigManifest::default();
        config.kind = "AgentManifest".to_string();
        assert!(SwarmRuntime::new(&config, Arc::new(InMemoryTransport::new())).is_err());
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let runtime = runtime();
        runtime.start().unwrap();
        assert!(runtime.is_running());
        assert!(runtime.start().is_err());
        runtime.shutdown().await;
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn test_cannot_restart_after_shutdown() {
        let runtime = runtime();
        runtime.start().unwrap();
        runtime.shutdown().await;
        runtime.shutdown().await;
        assert!(runtime.start().is_err());
    }

    #[tokio::test]
    async fn test_node_id_comes_from_manifest() {
        let mut config = NodeConfigManifest::default();
        config.spec.node.id = "coordinator-eu-1".to_string();
        let runtime = SwarmRuntime::new(&config, Arc::new(InMemoryTransport::new())).unwrap();
        assert_eq!(runtime.node_id().as_str(), "coordinator-eu-1");
        assert_eq!(runtime.snapshot().node_id, "coordinator-eu-1");
    }
}
