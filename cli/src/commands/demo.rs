// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `hive demo` - in-process swarm simulation.
//!
//! Simulated agents live in this process and share the coordinator's in-memory
//! transport. Each one polls its mailbox, opens the sealed messages addressed to
//! it, accepts every offer and works on whatever it is started on. Replies are
//! sealed under the agent's own identity and pushed through the coordinator's
//! `receive` path, so every hop is encrypted, signed and verified. Flaky agents
//! report their first task as failed to exercise reassignment.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hive_core::domain::agent::{AgentId, AgentMetadata, AgentRegistration, Capability, PerformanceProfile};
use hive_core::domain::message::{Message, SwarmMessage};
use hive_core::domain::node_config::NodeConfigManifest;
use hive_core::domain::task::{CoordinationKind, TaskId, TaskPriority, TaskRequirement, TaskSpec, TaskStatus};
use hive_core::infrastructure::InMemoryTransport;
use hive_swarm::application::{SwarmRuntime, SwarmService};

use super::run::install_metrics_exporter;

const SPECIALTIES: [(&str, &str); 3] = [
    ("summarize", "language"),
    ("translate", "language"),
    ("classify", "vision"),
];

#[derive(Args, Debug, Clone)]
pub struct DemoArgs {
    /// Number of simulated agents
    #[arg(long, default_value_t = 3)]
    pub agents: usize,

    /// Number of tasks to submit
    #[arg(long, default_value_t = 6)]
    pub tasks: usize,

    /// How many agents fail the first task they are started on
    #[arg(long, default_value_t = 1)]
    pub flaky: usize,

    /// Simulated work per progress step, in milliseconds
    #[arg(long, default_value_t = 40)]
    pub work_ms: u64,

    /// Give up after this many seconds
    #[arg(long, default_value_t = 20)]
    pub timeout_secs: u64,

    /// Print the final snapshot as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(mut config: NodeConfigManifest, args: DemoArgs) -> Result<()> {
    if args.agents == 0 {
        bail!("--agents must be at least 1");
    }
    install_metrics_exporter(config.spec.observability.metrics_port)?;

    // Demo pacing: re-offer queued tasks quickly instead of on production intervals
    config.spec.allocator.coordination_interval = Duration::from_millis(200);
    config.spec.allocator.pending_reoffer_after = Duration::from_millis(300);

    let transport = Arc::new(InMemoryTransport::new());
    let runtime = Arc::new(SwarmRuntime::new(&config, transport.clone()).context("Failed to build swarm runtime")?);
    runtime.start()?;

    let agents_token = CancellationToken::new();
    let mut workers = Vec::with_capacity(args.agents);
    for i in 0..args.agents {
        let agent = SimulatedAgent::join(
            &runtime,
            transport.clone(),
            i,
            i < args.flaky,
            Duration::from_millis(args.work_ms),
        )
        .await?;
        workers.push(agent.spawn(agents_token.child_token()));
    }

    println!(
        "{}",
        format!("Swarm of {} agents up, submitting {} tasks", args.agents, args.tasks).bold()
    );

    let priorities = [TaskPriority::Normal, TaskPriority::High, TaskPriority::Low, TaskPriority::Critical];
    let mut task_ids = Vec::with_capacity(args.tasks);
    for j in 0..args.tasks {
        let spec = TaskSpec::new(
            format!("demo task #{}", j + 1),
            vec![TaskRequirement::capability("analysis")],
        )
        .with_priority(priorities[j % priorities.len()])
        .with_estimated_duration(Duration::from_millis(args.work_ms * 2));
        task_ids.push(runtime.submit_task(spec).await?);
    }

    let finished = tokio::time::timeout(Duration::from_secs(args.timeout_secs), async {
        loop {
            let tasks = runtime.allocator().list_tasks();
            if tasks.iter().all(|t| t.status == TaskStatus::Completed) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .is_ok();

    agents_token.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            warn!(error = %e, "Simulated agent ended abnormally");
        }
    }
    runtime.shutdown().await;

    println!();
    println!("{}", "Tasks:".bold());
    for task_id in &task_ids {
        let Some(task) = runtime.allocator().get_task(*task_id) else {
            continue;
        };
        let failures = runtime
            .allocator()
            .coordination_history(*task_id)
            .iter()
            .filter(|r| r.kind == CoordinationKind::Failed)
            .count();
        let status = match task.status {
            TaskStatus::Completed => task.status.to_string().green(),
            TaskStatus::Failed => task.status.to_string().red(),
            _ => task.status.to_string().yellow(),
        };
        let agents: Vec<&str> = task.assigned_agents.iter().map(|a| a.as_str()).collect();
        println!(
            "  {} {:<9} {:<12} agents=[{}] failures={}",
            task.id,
            format!("{:?}", task.priority).to_lowercase(),
            status,
            agents.join(", "),
            failures
        );
    }
    println!();

    let snapshot = runtime.snapshot();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!("{}", snapshot);
    }

    if !finished {
        bail!("demo timed out after {}s with unfinished tasks", args.timeout_secs);
    }
    println!();
    println!("{}", "✓ All tasks completed".green());
    Ok(())
}

struct SimulatedAgent {
    id: AgentId,
    runtime: Arc<SwarmRuntime>,
    transport: Arc<InMemoryTransport>,
    flaky: bool,
    work: Duration,
}

impl SimulatedAgent {
    async fn join(
        runtime: &Arc<SwarmRuntime>,
        transport: Arc<InMemoryTransport>,
        index: usize,
        flaky: bool,
        work: Duration,
    ) -> Result<Self> {
        let id = AgentId::new(format!("agent-{:02}", index + 1));
        let (specialty, category) = SPECIALTIES[index % SPECIALTIES.len()];
        let performance = PerformanceProfile {
            accuracy: 0.9,
            latency_ms: 20.0 + 10.0 * index as f64,
            throughput: 5.0,
        };

        runtime
            .register_agent(
                AgentRegistration::new(
                    id.clone(),
                    vec![
                        Capability::new("analysis", "general").with_performance(performance),
                        Capability::new(specialty, category).with_performance(performance),
                    ],
                    AgentMetadata::new(id.as_str(), "hive-demo").with_tags(["demo"]),
                )
                .with_endpoint("in-memory", id.as_str()),
            )
            .await?;
        runtime.heartbeat(&id).await?;
        // The simulated agent signs with a key held in the coordinator's ring
        runtime.bus().keyring().enroll(&id);

        info!(agent_id = %id, specialty, flaky, "Simulated agent joined");
        Ok(Self {
            id,
            runtime: runtime.clone(),
            transport,
            flaky,
            work,
        })
    }

    fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_millis(25));
        let mut failed_once = false;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => break,
            }

            if let Err(e) = self.runtime.heartbeat(&self.id).await {
                warn!(agent_id = %self.id, error = %e, "Heartbeat rejected");
            }

            for sealed in self.transport.take(&self.id) {
                let message = match self.runtime.bus().open(&sealed) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(agent_id = %self.id, error = %e, "Dropping unreadable message");
                        continue;
                    }
                };
                match SwarmMessage::from_payload(&message.payload) {
                    Some(SwarmMessage::TaskOffer { task_id, .. }) => {
                        self.reply(SwarmMessage::TaskAcceptance {
                            task_id,
                            agent_id: self.id.clone(),
                        })
                        .await;
                    }
                    Some(SwarmMessage::TaskStart { task_id, .. }) => {
                        tokio::time::sleep(self.work).await;
                        self.reply(self.progress(task_id, 50.0, Some(TaskStatus::InProgress))).await;
                        tokio::time::sleep(self.work).await;

                        if self.flaky && !failed_once {
                            failed_once = true;
                            info!(agent_id = %self.id, task_id = %task_id, "Simulated agent failing its task");
                            self.reply(self.progress(task_id, 50.0, Some(TaskStatus::Failed))).await;
                        } else {
                            self.reply(self.progress(task_id, 100.0, Some(TaskStatus::Completed))).await;
                        }
                    }
                    Some(other) => {
                        debug!(agent_id = %self.id, task_id = %other.task_id(), "Notification received");
                    }
                    None => {}
                }
            }
        }
    }

    fn progress(&self, task_id: TaskId, progress: f64, status: Option<TaskStatus>) -> SwarmMessage {
        SwarmMessage::ProgressUpdate {
            task_id,
            agent_id: self.id.clone(),
            progress,
            status,
        }
    }

    /// Seal a reply as this agent and deliver it to the coordinator.
    async fn reply(&self, message: SwarmMessage) {
        let bus = self.runtime.bus();
        let outbound = Message::new(self.id.clone(), bus.local_identity().clone(), message.to_payload());
        let sealed = match bus.seal(&outbound).await {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!(agent_id = %self.id, error = %e, "Failed to seal reply");
                return;
            }
        };
        if let Err(e) = bus.receive(&sealed).await {
            warn!(agent_id = %self.id, error = %e, "Coordinator rejected reply");
        }
    }
}
