//! The agent lifecycle: composes the metric sources, control plane client,
//! command registry and scheduler into three recurring jobs, and owns
//! startup and graceful shutdown.

use crate::config::{AgentConfig, ConfigError};
use crate::registry::CommandRegistry;
use crate::scheduler::{job_action, JobAction, JobScheduler};
use anyhow::Result;
use chrono::Utc;
use hostmon_client::ControlPlane;
use hostmon_collector::cpu::CpuSource;
use hostmon_collector::disk::DiskSource;
use hostmon_collector::memory::MemorySource;
use hostmon_collector::network::NetworkSource;
use hostmon_collector::{CollectorError, MetricSource};
use hostmon_common::types::{Command, CommandOutcome, MetricSample};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

pub const METRICS_JOB: &str = "metrics-report";
pub const HEARTBEAT_JOB: &str = "heartbeat";
pub const COMMAND_POLL_JOB: &str = "command-poll";

/// The per-family metric sources, composed explicitly and sampled together
/// so every report carries a single timestamp.
pub struct MetricSources {
    cpu: CpuSource,
    memory: MemorySource,
    disk: DiskSource,
    network: NetworkSource,
}

impl MetricSources {
    pub fn new() -> Self {
        Self {
            cpu: CpuSource::new(),
            memory: MemorySource::new(),
            disk: DiskSource::new(),
            network: NetworkSource::new(),
        }
    }

    /// Reads every source and assembles one combined sample. The first
    /// failing source aborts the whole sample; a partial report is never
    /// produced.
    pub fn sample(&mut self) -> Result<MetricSample, CollectorError> {
        let cpu = self.cpu.collect()?;
        let memory = self.memory.collect()?;
        let disk = self.disk.collect()?;
        let network = self.network.collect()?;
        Ok(MetricSample {
            timestamp: Utc::now(),
            cpu,
            memory,
            disk,
            network,
        })
    }
}

impl Default for MetricSources {
    fn default() -> Self {
        Self::new()
    }
}

/// One execution of the metrics-report job.
pub struct MetricsCycle {
    control: Arc<dyn ControlPlane>,
    sources: tokio::sync::Mutex<MetricSources>,
}

impl MetricsCycle {
    pub fn new(control: Arc<dyn ControlPlane>, sources: MetricSources) -> Arc<Self> {
        Arc::new(Self {
            control,
            sources: tokio::sync::Mutex::new(sources),
        })
    }

    pub fn action(cycle: &Arc<Self>) -> JobAction {
        let cycle = Arc::clone(cycle);
        job_action(move || {
            let cycle = Arc::clone(&cycle);
            async move { cycle.run().await }
        })
    }

    pub async fn run(&self) -> Result<()> {
        let sample = self.sources.lock().await.sample()?;
        self.control.report_metrics(&sample).await?;
        tracing::debug!("Monitoring data reported");
        Ok(())
    }
}

/// One execution of the heartbeat job. Carries the current interval so a
/// server-suggested change can be compared and applied; the job re-registers
/// itself through the scheduler, which is safe to do from inside the run.
pub struct HeartbeatCycle {
    control: Arc<dyn ControlPlane>,
    scheduler: Arc<JobScheduler>,
    interval: Mutex<Duration>,
}

impl HeartbeatCycle {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        scheduler: Arc<JobScheduler>,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            control,
            scheduler,
            interval: Mutex::new(interval),
        })
    }

    pub fn action(cycle: &Arc<Self>) -> JobAction {
        let cycle = Arc::clone(cycle);
        job_action(move || {
            let cycle = Arc::clone(&cycle);
            async move { cycle.run().await }
        })
    }

    pub fn interval(&self) -> Duration {
        *self.interval.lock().unwrap()
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        let ack = self.control.send_heartbeat().await?;
        tracing::debug!(
            next_expected_secs = ?ack.next_expected_in_seconds,
            "Heartbeat acknowledged"
        );

        let Some(secs) = ack.next_expected_in_seconds else {
            return Ok(());
        };
        if secs == 0 {
            tracing::warn!("Ignoring zero heartbeat interval suggested by server");
            return Ok(());
        }
        let suggested = Duration::from_secs(secs);
        let current = *self.interval.lock().unwrap();
        if suggested == current {
            return Ok(());
        }

        tracing::info!(
            from_secs = current.as_secs(),
            to_secs = secs,
            "Adjusting heartbeat interval"
        );
        *self.interval.lock().unwrap() = suggested;
        self.scheduler
            .register_or_replace(HEARTBEAT_JOB, suggested, Self::action(&self));
        Ok(())
    }
}

/// One execution of the command-poll job: fetch, dispatch, report.
pub struct CommandCycle {
    control: Arc<dyn ControlPlane>,
    registry: Arc<CommandRegistry>,
}

impl CommandCycle {
    pub fn new(control: Arc<dyn ControlPlane>, registry: Arc<CommandRegistry>) -> Arc<Self> {
        Arc::new(Self { control, registry })
    }

    pub fn action(cycle: &Arc<Self>) -> JobAction {
        let cycle = Arc::clone(cycle);
        job_action(move || {
            let cycle = Arc::clone(&cycle);
            async move { cycle.run().await }
        })
    }

    pub async fn run(&self) -> Result<()> {
        let commands = self.control.fetch_pending_commands().await?;
        if commands.is_empty() {
            tracing::debug!("no pending commands");
            return Ok(());
        }
        tracing::info!(count = commands.len(), "Fetched pending commands");

        // Commands run one after another, in server order, so handlers
        // touching the same local resource cannot race each other. Every
        // accepted command gets exactly one result report; a failed report
        // terminates the command from the agent's point of view anyway.
        for command in &commands {
            let outcome = self.execute(command).await;
            if let Err(e) = self
                .control
                .report_command_result(&command.id, &outcome)
                .await
            {
                tracing::warn!(
                    command_id = %command.id,
                    error = %e,
                    "Failed to report command result"
                );
            }
        }
        Ok(())
    }

    async fn execute(&self, command: &Command) -> CommandOutcome {
        let Some(handler) = self.registry.lookup(&command.kind) else {
            tracing::warn!(
                command_id = %command.id,
                kind = %command.kind,
                "Unsupported command type"
            );
            return CommandOutcome::error(format!("unsupported command type: {}", command.kind));
        };

        tracing::info!(command_id = %command.id, kind = %command.kind, "Executing command");
        match handler.handle(&command.payload).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(
                    command_id = %command.id,
                    kind = %command.kind,
                    error = %e,
                    "Command handler failed"
                );
                CommandOutcome::error(format!("error executing command: {e:#}"))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

pub struct Agent {
    config: AgentConfig,
    scheduler: Arc<JobScheduler>,
    metrics: Arc<MetricsCycle>,
    heartbeat: Arc<HeartbeatCycle>,
    commands: Arc<CommandCycle>,
    state: Mutex<AgentState>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        control: Arc<dyn ControlPlane>,
        registry: Arc<CommandRegistry>,
        sources: MetricSources,
    ) -> Self {
        let scheduler = Arc::new(JobScheduler::new());
        let metrics = MetricsCycle::new(Arc::clone(&control), sources);
        let heartbeat = HeartbeatCycle::new(
            Arc::clone(&control),
            Arc::clone(&scheduler),
            Duration::from_secs(config.heartbeat_interval_secs),
        );
        let commands = CommandCycle::new(control, registry);
        Self {
            config,
            scheduler,
            metrics,
            heartbeat,
            commands,
            state: Mutex::new(AgentState::Stopped),
        }
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock().unwrap()
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat.interval()
    }

    /// Validates configuration, registers the three recurring jobs, starts
    /// the scheduler and runs one immediate execution of each job so the
    /// agent reports in without waiting a full interval. The agent enters
    /// `Running` regardless of the immediate executions' outcomes; a
    /// configuration error is the only failure that prevents startup.
    pub async fn start(&self) -> Result<(), ConfigError> {
        self.set_state(AgentState::Starting);
        tracing::info!(agent_id = %self.config.agent_id, "Starting agent");

        if let Err(e) = self.config.validate() {
            self.set_state(AgentState::Stopped);
            return Err(e);
        }

        self.scheduler.register_or_replace(
            METRICS_JOB,
            Duration::from_secs(self.config.monitoring_interval_secs),
            MetricsCycle::action(&self.metrics),
        );
        self.scheduler.register_or_replace(
            HEARTBEAT_JOB,
            Duration::from_secs(self.config.heartbeat_interval_secs),
            HeartbeatCycle::action(&self.heartbeat),
        );
        self.scheduler.register_or_replace(
            COMMAND_POLL_JOB,
            Duration::from_secs(self.config.command_poll_interval_secs),
            CommandCycle::action(&self.commands),
        );
        self.scheduler.start();

        if let Err(e) = self.metrics.run().await {
            tracing::warn!(job = METRICS_JOB, error = %e, "Initial run failed");
        }
        if let Err(e) = Arc::clone(&self.heartbeat).run().await {
            tracing::warn!(job = HEARTBEAT_JOB, error = %e, "Initial run failed");
        }
        if let Err(e) = self.commands.run().await {
            tracing::warn!(job = COMMAND_POLL_JOB, error = %e, "Initial run failed");
        }

        self.set_state(AgentState::Running);
        tracing::info!("Agent started");
        Ok(())
    }

    /// Drains the scheduler, letting any run in flight finish, then reports
    /// the agent stopped.
    pub async fn shutdown(&self) {
        self.set_state(AgentState::Stopping);
        tracing::info!("Stopping agent");
        self.scheduler.stop().await;
        self.set_state(AgentState::Stopped);
        tracing::info!("Agent stopped");
    }

    fn set_state(&self, state: AgentState) {
        let mut current = self.state.lock().unwrap();
        tracing::debug!(from = ?*current, to = ?state, "Agent state transition");
        *current = state;
    }
}
