// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Membership Registry
//!
//! Authoritative store of swarm members, their advertised capabilities and
//! their liveness.
//!
//! # Liveness
//!
//! Detection is two-stage. An active agent silent for longer than
//! `heartbeat_interval + jitter_tolerance` accrues a *missed* heartbeat and a
//! [`MembershipEvent::HeartbeatMissed`] anomaly is published. Only once the miss
//! count reaches `grace_misses` (or the silence exceeds `health_check_timeout`)
//! is the agent demoted to `inactive`. Any heartbeat resets the count.
//!
//! The monitor never removes agents; only [`MembershipRegistry::unregister`] does.
//!
//! # Concurrency
//!
//! Agents and liveness trackers live in sharded [`DashMap`]s. When both are
//! touched, the agent entry is locked first.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::counter;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::background::spawn_periodic;
use crate::domain::agent::{Agent, AgentId, AgentRegistration, AgentStatus, Capability};
use crate::domain::discovery::{DiscoveryQuery, DiscoveryResult};
use crate::domain::events::MembershipEvent;
use crate::domain::node_config::RegistryConfig;
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Agent {0} not found")]
    NotFound(AgentId),

    #[error("Agent {0} is already registered")]
    AlreadyRegistered(AgentId),

    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    #[error("Agent {agent_id} cannot move from {from} to {to}")]
    InvalidTransition {
        agent_id: AgentId,
        from: AgentStatus,
        to: AgentStatus,
    },
}

#[derive(Debug, Default)]
struct LivenessTracker {
    missed: u32,
    /// Recent heartbeat intervals in milliseconds, oldest first
    intervals: VecDeque<i64>,
}

impl LivenessTracker {
    /// Record an interval sample. Returns the rolling average when the sample
    /// deviates from it by more than `threshold` (as a fraction of the average).
    fn observe(&mut self, interval_ms: i64, history: usize, threshold: f64) -> Option<f64> {
        let irregular = if self.intervals.len() >= 3 {
            let average = self.intervals.iter().sum::<i64>() as f64 / self.intervals.len() as f64;
            let deviation = (interval_ms as f64 - average).abs();
            (average > 0.0 && deviation > threshold * average).then_some(average)
        } else {
            None
        };

        self.intervals.push_back(interval_ms);
        while self.intervals.len() > history {
            self.intervals.pop_front();
        }
        irregular
    }
}

pub struct MembershipRegistry {
    agents: DashMap<AgentId, Agent>,
    liveness: DashMap<AgentId, LivenessTracker>,
    config: RegistryConfig,
    event_bus: EventBus,
}

impl MembershipRegistry {
    pub fn new(config: RegistryConfig, event_bus: EventBus) -> Self {
        Self {
            agents: DashMap::new(),
            liveness: DashMap::new(),
            config,
            event_bus,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Admit a new agent. The agent starts in `registering` until its first heartbeat.
    pub fn register(&self, registration: AgentRegistration) -> Result<Agent, RegistryError> {
        validate_registration(&registration)?;

        let now = Utc::now();
        let AgentRegistration {
            id,
            capabilities,
            endpoints,
            mut metadata,
        } = registration;
        metadata.created_at = now;
        metadata.updated_at = now;

        let agent = Agent {
            id: id.clone(),
            capabilities,
            endpoints,
            metadata,
            status: AgentStatus::Registering,
            last_heartbeat: now,
            registered_at: now,
        };

        match self.agents.entry(id.clone()) {
            Entry::Occupied(_) => return Err(RegistryError::AlreadyRegistered(id)),
            Entry::Vacant(slot) => {
                slot.insert(agent.clone());
            }
        }
        self.liveness.insert(id.clone(), LivenessTracker::default());

        info!(agent_id = %id, capabilities = agent.capabilities.len(), "Agent registered");
        self.event_bus.publish_membership_event(MembershipEvent::AgentRegistered {
            agent_id: id,
            capabilities: agent.capability_ids(),
            registered_at: now,
        });

        Ok(agent)
    }

    pub fn update_capabilities(
        &self,
        agent_id: &AgentId,
        capabilities: Vec<Capability>,
    ) -> Result<Agent, RegistryError> {
        validate_capabilities(&capabilities)?;

        let now = Utc::now();
        let updated = {
            let mut agent = self
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| RegistryError::NotFound(agent_id.clone()))?;
            agent.capabilities = capabilities;
            agent.metadata.updated_at = now;
            agent.clone()
        };

        debug!(agent_id = %agent_id, "Capabilities updated");
        self.event_bus.publish_membership_event(MembershipEvent::CapabilitiesUpdated {
            agent_id: agent_id.clone(),
            capabilities: updated.capability_ids(),
            updated_at: now,
        });
        Ok(updated)
    }

    /// Explicit status change. Re-applying the current status is a no-op.
    pub fn update_status(&self, agent_id: &AgentId, status: AgentStatus) -> Result<Agent, RegistryError> {
        let now = Utc::now();
        let (updated, from) = {
            let mut agent = self
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| RegistryError::NotFound(agent_id.clone()))?;

            let from = agent.status;
            if from == status {
                return Ok(agent.clone());
            }
            if status == AgentStatus::Registering {
                return Err(RegistryError::InvalidTransition {
                    agent_id: agent_id.clone(),
                    from,
                    to: status,
                });
            }

            agent.status = status;
            agent.metadata.updated_at = now;
            if status == AgentStatus::Active {
                if let Some(mut tracker) = self.liveness.get_mut(agent_id) {
                    tracker.missed = 0;
                }
            }
            (agent.clone(), from)
        };

        info!(agent_id = %agent_id, from = %from, to = %status, "Agent status changed");
        self.event_bus.publish_membership_event(MembershipEvent::StatusChanged {
            agent_id: agent_id.clone(),
            from,
            to: status,
            changed_at: now,
        });
        Ok(updated)
    }

    pub fn record_heartbeat(&self, agent_id: &AgentId) -> Result<Agent, RegistryError> {
        self.record_heartbeat_at(agent_id, Utc::now())
    }

    /// Record a heartbeat observed at `now`.
    ///
    /// `last_heartbeat` only moves forward. An agent in `registering` or
    /// `inactive` becomes `active`; a suspended agent stays suspended.
    pub fn record_heartbeat_at(&self, agent_id: &AgentId, now: DateTime<Utc>) -> Result<Agent, RegistryError> {
        let mut events = Vec::new();

        let updated = {
            let mut agent = self
                .agents
                .get_mut(agent_id)
                .ok_or_else(|| RegistryError::NotFound(agent_id.clone()))?;

            let interval_ms = (now - agent.last_heartbeat).num_milliseconds();
            if now > agent.last_heartbeat {
                agent.last_heartbeat = now;
            }

            let from = agent.status;
            let promoted = matches!(from, AgentStatus::Registering | AgentStatus::Inactive);
            if promoted {
                agent.status = AgentStatus::Active;
                agent.metadata.updated_at = now;
                events.push(MembershipEvent::StatusChanged {
                    agent_id: agent_id.clone(),
                    from,
                    to: AgentStatus::Active,
                    changed_at: now,
                });
            }

            let mut tracker = self.liveness.entry(agent_id.clone()).or_default();
            tracker.missed = 0;
            if promoted {
                // Silence before a (re)activation says nothing about cadence
                tracker.intervals.clear();
            } else if interval_ms > 0 {
                if let Some(average_ms) = tracker.observe(
                    interval_ms,
                    self.config.heartbeat_history,
                    self.config.irregularity_threshold,
                ) {
                    events.push(MembershipEvent::HeartbeatIrregular {
                        agent_id: agent_id.clone(),
                        interval_ms,
                        average_ms,
                        observed_at: now,
                    });
                }
            }

            agent.clone()
        };

        for event in events {
            if let MembershipEvent::StatusChanged { from, .. } = &event {
                info!(agent_id = %agent_id, from = %from, "Agent activated by heartbeat");
            }
            if let MembershipEvent::HeartbeatIrregular { interval_ms, average_ms, .. } = &event {
                debug!(agent_id = %agent_id, interval_ms, average_ms, "Irregular heartbeat timing");
            }
            self.event_bus.publish_membership_event(event);
        }
        Ok(updated)
    }

    /// Ranked search over the `active` agents.
    pub fn discover(&self, query: &DiscoveryQuery) -> DiscoveryResult {
        let started = Instant::now();

        let mut agents: Vec<Agent> = self
            .agents
            .iter()
            .filter(|entry| entry.is_active() && query.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        agents.sort_by(|a, b| query.compare(a, b));

        let total_found = agents.len();
        agents.truncate(query.limit());

        DiscoveryResult {
            agents,
            total_found,
            search_time: started.elapsed(),
        }
    }

    pub fn unregister(&self, agent_id: &AgentId) -> Result<Agent, RegistryError> {
        let (_, agent) = self
            .agents
            .remove(agent_id)
            .ok_or_else(|| RegistryError::NotFound(agent_id.clone()))?;
        self.liveness.remove(agent_id);

        info!(agent_id = %agent_id, "Agent unregistered");
        self.event_bus.publish_membership_event(MembershipEvent::AgentUnregistered {
            agent_id: agent_id.clone(),
            unregistered_at: Utc::now(),
        });
        Ok(agent)
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<Agent> {
        self.agents.get(agent_id).map(|a| a.clone())
    }

    /// All agents, ordered by identity.
    pub fn list(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.agents.iter().map(|a| a.value().clone()).collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    pub fn active_count(&self) -> usize {
        self.agents.iter().filter(|a| a.is_active()).count()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn missed_heartbeats(&self, agent_id: &AgentId) -> Option<u32> {
        self.liveness.get(agent_id).map(|t| t.missed)
    }

    pub fn check_liveness(&self) -> Vec<AgentId> {
        self.check_liveness_at(Utc::now())
    }

    /// One liveness sweep at `now`. Returns the agents demoted to `inactive`.
    pub fn check_liveness_at(&self, now: DateTime<Utc>) -> Vec<AgentId> {
        let overdue = self.config.heartbeat_interval.saturating_add(self.config.jitter_tolerance);
        let overdue_ms = i64::try_from(overdue.as_millis()).unwrap_or(i64::MAX);
        let hard_ms = i64::try_from(self.config.health_check_timeout.as_millis()).unwrap_or(i64::MAX);

        let candidates: Vec<AgentId> = self
            .agents
            .iter()
            .filter(|a| a.is_active())
            .map(|a| a.id.clone())
            .collect();

        let mut events = Vec::new();
        let mut timed_out = Vec::new();

        for agent_id in candidates {
            let Some(mut agent) = self.agents.get_mut(&agent_id) else {
                continue;
            };
            // Re-check under the entry lock: a heartbeat or status update may have raced us
            if !agent.is_active() {
                continue;
            }
            let silent_ms = (now - agent.last_heartbeat).num_milliseconds();
            if silent_ms <= overdue_ms {
                continue;
            }

            let missed = {
                let mut tracker = self.liveness.entry(agent_id.clone()).or_default();
                tracker.missed += 1;
                tracker.missed
            };
            events.push(MembershipEvent::HeartbeatMissed {
                agent_id: agent_id.clone(),
                missed,
                silent_for_ms: silent_ms,
                detected_at: now,
            });

            if missed >= self.config.grace_misses || silent_ms > hard_ms {
                agent.status = AgentStatus::Inactive;
                agent.metadata.updated_at = now;
                warn!(agent_id = %agent_id, missed, silent_ms, "Agent timed out, marking inactive");
                counter!("hive_agents_timed_out_total").increment(1);

                events.push(MembershipEvent::StatusChanged {
                    agent_id: agent_id.clone(),
                    from: AgentStatus::Active,
                    to: AgentStatus::Inactive,
                    changed_at: now,
                });
                events.push(MembershipEvent::AgentTimedOut {
                    agent_id: agent_id.clone(),
                    missed,
                    timed_out_at: now,
                });
                timed_out.push(agent_id);
            } else {
                debug!(agent_id = %agent_id, missed, silent_ms, "Heartbeat overdue");
            }
        }

        for event in events {
            self.event_bus.publish_membership_event(event);
        }
        timed_out
    }

    /// Run the liveness sweep every `heartbeat_interval` until `shutdown` fires.
    pub fn spawn_liveness_monitor(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let period = self.config.heartbeat_interval;
        spawn_periodic("membership-liveness", period, shutdown, move || {
            let registry = self.clone();
            async move {
                registry.check_liveness();
            }
        })
    }
}

fn validate_registration(registration: &AgentRegistration) -> Result<(), RegistryError> {
    if registration.id.is_empty() {
        return Err(RegistryError::InvalidRegistration("agent id must not be empty".to_string()));
    }
    if registration.metadata.name.trim().is_empty() {
        return Err(RegistryError::InvalidRegistration("metadata.name is required".to_string()));
    }
    if registration.metadata.author.trim().is_empty() {
        return Err(RegistryError::InvalidRegistration("metadata.author is required".to_string()));
    }
    for (field, value) in [
        ("reputation", registration.metadata.reputation),
        ("success_rate", registration.metadata.success_rate),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(RegistryError::InvalidRegistration(format!(
                "metadata.{} must be within [0, 1], got {}",
                field, value
            )));
        }
    }
    validate_capabilities(&registration.capabilities)
}

fn validate_capabilities(capabilities: &[Capability]) -> Result<(), RegistryError> {
    if capabilities.is_empty() {
        return Err(RegistryError::InvalidRegistration(
            "at least one capability is required".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    for capability in capabilities {
        if capability.id.trim().is_empty() {
            return Err(RegistryError::InvalidRegistration("capability id must not be empty".to_string()));
        }
        if !seen.insert(capability.id.as_str()) {
            return Err(RegistryError::InvalidRegistration(format!(
                "duplicate capability id '{}'",
                capability.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentMetadata;
    use crate::infrastructure::event_bus::DomainEvent;
    use std::time::Duration;

    fn config() -> RegistryConfig {
        RegistryConfig {
            heartbeat_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(90),
            jitter_tolerance: Duration::from_secs(5),
            grace_misses: 2,
            heartbeat_history: 10,
            irregularity_threshold: 0.5,
        }
    }

    fn registration(id: &str, capabilities: &[&str]) -> AgentRegistration {
        AgentRegistration::new(
            id,
            capabilities.iter().map(|c| Capability::new(*c, "general")).collect(),
            AgentMetadata::new(format!("{} agent", id), "tests"),
        )
    }

    fn registry() -> (MembershipRegistry, EventBus) {
        let bus = EventBus::new(256);
        (MembershipRegistry::new(config(), bus.clone()), bus)
    }

    fn membership_events(receiver: &mut crate::infrastructure::event_bus::EventReceiver) -> Vec<MembershipEvent> {
        receiver
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                DomainEvent::Membership(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_register_starts_in_registering() {
        let (registry, bus) = registry();
        let mut events = bus.subscribe();

        let agent = registry.register(registration("A", &["nlp"])).unwrap();
        assert_eq!(agent.id, AgentId::from("A"));
        assert_eq!(agent.status, AgentStatus::Registering);
        assert!(matches!(
            membership_events(&mut events).as_slice(),
            [MembershipEvent::AgentRegistered { .. }]
        ));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let (registry, _) = registry();
        registry.register(registration("A", &["nlp"])).unwrap();
        assert_eq!(
            registry.register(registration("A", &["vision"])).unwrap_err(),
            RegistryError::AlreadyRegistered(AgentId::from("A"))
        );
        // The original registration is untouched
        assert!(registry.get(&AgentId::from("A")).unwrap().has_capability("nlp"));
    }

    #[test]
    fn test_registration_validation() {
        let (registry, _) = registry();

        assert!(registry.register(registration("", &["nlp"])).is_err());
        assert!(registry.register(registration("A", &[])).is_err());
        assert!(registry.register(registration("A", &["nlp", "nlp"])).is_err());

        let mut missing_author = registration("A", &["nlp"]);
        missing_author.metadata.author = " ".to_string();
        assert!(registry.register(missing_author).is_err());

        let mut bad_reputation = registration("A", &["nlp"]);
        bad_reputation.metadata.reputation = 1.5;
        assert!(registry.register(bad_reputation).is_err());

        assert!(registry.is_empty());
    }

    #[test]
    fn test_first_heartbeat_activates() {
        let (registry, _) = registry();
        let id = AgentId::from("A");
        registry.register(registration("A", &["nlp"])).unwrap();

        let agent = registry.record_heartbeat(&id).unwrap();
        assert_eq!(agent.status, AgentStatus::Active);
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_unknown_agent_operations_fail() {
        let (registry, _) = registry();
        let ghost = AgentId::from("ghost");
        assert!(matches!(registry.record_heartbeat(&ghost), Err(RegistryError::NotFound(_))));
        assert!(matches!(
            registry.update_status(&ghost, AgentStatus::Active),
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.update_capabilities(&ghost, vec![Capability::new("x", "y")]),
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(registry.unregister(&ghost), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_status_update_is_idempotent() {
        let (registry, bus) = registry();
        let id = AgentId::from("A");
        registry.register(registration("A", &["nlp"])).unwrap();
        registry.update_status(&id, AgentStatus::Active).unwrap();

        let mut events = bus.subscribe();
        registry.update_status(&id, AgentStatus::Active).unwrap();
        assert!(membership_events(&mut events).is_empty());

        assert!(matches!(
            registry.update_status(&id, AgentStatus::Registering),
            Err(RegistryError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_grace_window_before_timeout() {
        let (registry, bus) = registry();
        let id = AgentId::from("A");
        registry.register(registration("A", &["nlp"])).unwrap();
        let t0 = Utc::now();
        registry.record_heartbeat_at(&id, t0).unwrap();
        let mut events = bus.subscribe();

        // Within interval + jitter: nothing happens
        assert!(registry.check_liveness_at(t0 + chrono::Duration::seconds(34)).is_empty());
        assert_eq!(registry.missed_heartbeats(&id), Some(0));

        // First miss: anomaly only
        assert!(registry.check_liveness_at(t0 + chrono::Duration::seconds(40)).is_empty());
        assert_eq!(registry.get(&id).unwrap().status, AgentStatus::Active);
        assert_eq!(registry.missed_heartbeats(&id), Some(1));

        // Second miss reaches the grace threshold
        let timed_out = registry.check_liveness_at(t0 + chrono::Duration::seconds(70));
        assert_eq!(timed_out, vec![id.clone()]);
        assert_eq!(registry.get(&id).unwrap().status, AgentStatus::Inactive);

        let observed = membership_events(&mut events);
        assert_eq!(
            observed
                .iter()
                .filter(|e| matches!(e, MembershipEvent::HeartbeatMissed { .. }))
                .count(),
            2
        );
        assert!(observed.iter().any(|e| matches!(e, MembershipEvent::AgentTimedOut { missed: 2, .. })));

        // Inactive agents are not swept again and are never removed
        assert!(registry.check_liveness_at(t0 + chrono::Duration::seconds(300)).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_heartbeat_resets_missed_counter() {
        let (registry, _) = registry();
        let id = AgentId::from("A");
        registry.register(registration("A", &["nlp"])).unwrap();
        let t0 = Utc::now();
        registry.record_heartbeat_at(&id, t0).unwrap();

        registry.check_liveness_at(t0 + chrono::Duration::seconds(40));
        assert_eq!(registry.missed_heartbeats(&id), Some(1));

        registry.record_heartbeat_at(&id, t0 + chrono::Duration::seconds(41)).unwrap();
        assert_eq!(registry.missed_heartbeats(&id), Some(0));

        // A single overdue sweep after the reset is only a soft anomaly again
        assert!(registry.check_liveness_at(t0 + chrono::Duration::seconds(80)).is_empty());
        assert_eq!(registry.get(&id).unwrap().status, AgentStatus::Active);
    }

    #[test]
    fn test_health_check_timeout_is_a_hard_ceiling() {
        let mut cfg = config();
        cfg.grace_misses = 10;
        let registry = MembershipRegistry::new(cfg, EventBus::new(16));
        let id = AgentId::from("A");
        registry.register(registration("A", &["nlp"])).unwrap();
        let t0 = Utc::now();
        registry.record_heartbeat_at(&id, t0).unwrap();

        assert_eq!(registry.check_liveness_at(t0 + chrono::Duration::seconds(91)), vec![id.clone()]);
        assert_eq!(registry.missed_heartbeats(&id), Some(1));
    }

    #[test]
    fn test_heartbeat_reactivates_inactive_agent() {
        let (registry, _) = registry();
        let id = AgentId::from("A");
        registry.register(registration("A", &["nlp"])).unwrap();
        let t0 = Utc::now();
        registry.record_heartbeat_at(&id, t0).unwrap();
        registry.check_liveness_at(t0 + chrono::Duration::seconds(40));
        registry.check_liveness_at(t0 + chrono::Duration::seconds(80));
        assert_eq!(registry.get(&id).unwrap().status, AgentStatus::Inactive);

        let agent = registry.record_heartbeat_at(&id, t0 + chrono::Duration::seconds(90)).unwrap();
        assert_eq!(agent.status, AgentStatus::Active);
        assert_eq!(registry.missed_heartbeats(&id), Some(0));
    }

    #[test]
    fn test_suspended_agent_stays_suspended() {
        let (registry, _) = registry();
        let id = AgentId::from("A");
        registry.register(registration("A", &["nlp"])).unwrap();
        registry.update_status(&id, AgentStatus::Suspended).unwrap();

        let t0 = Utc::now();
        let agent = registry.record_heartbeat_at(&id, t0).unwrap();
        assert_eq!(agent.status, AgentStatus::Suspended);
        assert!(registry.check_liveness_at(t0 + chrono::Duration::seconds(600)).is_empty());
    }

    #[test]
    fn test_huge_timeouts_never_demote() {
        let config = RegistryConfig {
            heartbeat_interval: Duration::MAX,
            jitter_tolerance: Duration::MAX,
            health_check_timeout: Duration::from_secs(u64::MAX / 2),
            ..config()
        };
        let registry = MembershipRegistry::new(config, EventBus::new(16));
        let id = AgentId::from("A");
        registry.register(registration("A", &["nlp"])).unwrap();
        let t0 = Utc::now();
        registry.record_heartbeat_at(&id, t0).unwrap();

        let far = t0 + chrono::Duration::days(365 * 1000);
        assert!(registry.check_liveness_at(far).is_empty());
        assert_eq!(registry.get(&id).unwrap().status, AgentStatus::Active);
        assert_eq!(registry.missed_heartbeats(&id), Some(0));
    }

    #[test]
    fn test_stale_heartbeat_does_not_move_clock_backwards() {
        let (registry, _) = registry();
        let id = AgentId::from("A");
        registry.register(registration("A", &["nlp"])).unwrap();
        let t0 = Utc::now() + chrono::Duration::seconds(10);
        registry.record_heartbeat_at(&id, t0).unwrap();

        let agent = registry.record_heartbeat_at(&id, t0 - chrono::Duration::seconds(5)).unwrap();
        assert_eq!(agent.last_heartbeat, t0);
    }

    #[test]
    fn test_irregular_heartbeat_is_flagged() {
        let (registry, bus) = registry();
        let id = AgentId::from("A");
        registry.register(registration("A", &["nlp"])).unwrap();
        let t0 = Utc::now();
        registry.record_heartbeat_at(&id, t0).unwrap();
        for i in 1..=3 {
            registry
                .record_heartbeat_at(&id, t0 + chrono::Duration::seconds(30 * i))
                .unwrap();
        }

        let mut events = bus.subscribe();
        // 30s cadence, then a 5s gap: deviation of 25s exceeds 50% of the average
        registry
            .record_heartbeat_at(&id, t0 + chrono::Duration::seconds(95))
            .unwrap();
        let observed = membership_events(&mut events);
        assert!(observed.iter().any(|e| matches!(
            e,
            MembershipEvent::HeartbeatIrregular { interval_ms: 5_000, .. }
        )));
        // Observability only: the agent is untouched
        assert_eq!(registry.get(&id).unwrap().status, AgentStatus::Active);
    }

    #[test]
    fn test_discover_by_capability() {
        let (registry, _) = registry();
        for (id, caps) in [("A", &["nlp"][..]), ("B", &["vision"][..]), ("C", &["audio"][..])] {
            registry.register(registration(id, caps)).unwrap();
            registry.record_heartbeat(&AgentId::from(id)).unwrap();
        }

        let query = DiscoveryQuery::with_capabilities(["nlp"]);
        for _ in 0..2 {
            let result = registry.discover(&query);
            assert_eq!(result.total_found, 1);
            assert_eq!(result.agents.len(), 1);
            assert_eq!(result.agents[0].id, AgentId::from("A"));
        }
    }

    #[test]
    fn test_discover_defaults_and_limit() {
        let (registry, _) = registry();
        for (id, reputation) in [("A", 0.6), ("B", 0.9), ("C", 0.7), ("D", 0.99)] {
            let mut reg = registration(id, &["nlp"]);
            reg.metadata.reputation = reputation;
            registry.register(reg).unwrap();
            if id != "D" {
                registry.record_heartbeat(&AgentId::from(id)).unwrap();
            }
        }

        // D never heartbeated, so it is not active and never discovered
        let all = registry.discover(&DiscoveryQuery::default());
        let ids: Vec<&str> = all.agents.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C", "A"]);
        assert_eq!(all.total_found, 3);

        let limited = registry.discover(&DiscoveryQuery {
            limit: Some(1),
            ..DiscoveryQuery::default()
        });
        assert_eq!(limited.agents.len(), 1);
        assert_eq!(limited.total_found, 3);
    }

    #[test]
    fn test_unregister_removes_agent() {
        let (registry, bus) = registry();
        let id = AgentId::from("A");
        registry.register(registration("A", &["nlp"])).unwrap();
        let mut events = bus.subscribe();

        registry.unregister(&id).unwrap();
        assert!(registry.get(&id).is_none());
        assert_eq!(registry.missed_heartbeats(&id), None);
        assert!(matches!(
            membership_events(&mut events).as_slice(),
            [MembershipEvent::AgentUnregistered { .. }]
        ));
    }
}
