use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use super::dispatch::{DispatchOutcome, Dispatcher};
use crate::registry::AgentRegistry;
use crate::scheduler::FleetScheduler;
use crate::types::{Agent, AgentHealth, AgentStatus, ScheduleTask, TaskId, TaskStatus};

#[derive(Debug, Clone, Serialize)]
pub struct TaskRun {
    pub agent: String,
    pub task_id: TaskId,
    pub task_name: String,
    pub mode: String,
    pub success: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dispatched {
    pub agent: String,
    pub task_id: TaskId,
    pub task_name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub agents_checked: usize,
    pub unavailable: Vec<String>,
    pub busy: Vec<String>,
    pub idle: Vec<String>,
    pub dispatched: Vec<Dispatched>,
    /// Runs that finished since the previous tick.
    pub finished: Vec<TaskRun>,
}

impl TickReport {
    pub fn failures(&self) -> usize {
        self.finished.iter().filter(|r| !r.success).count()
    }
}

/// Drives the fleet: keeps the agents it polls alive, hands each free agent
/// its next task and records the result back into the registry and
/// scheduler.
///
/// Runs are spawned in the background; a long task on one agent never holds
/// up polling of the others.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    scheduler: Arc<FleetScheduler>,
    dispatcher: Arc<dyn Dispatcher>,
    poll_interval: Duration,
    running: Arc<tokio::sync::Mutex<JoinSet<Result<TaskRun>>>>,
    busy: Arc<Mutex<HashSet<String>>>,
}

/// Frees the agent for the next tick once its run ends, even on panic.
struct BusyGuard {
    busy: Arc<Mutex<HashSet<String>>>,
    agent: String,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.agent);
    }
}

impl Orchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        scheduler: Arc<FleetScheduler>,
        dispatcher: Arc<dyn Dispatcher>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            registry,
            scheduler,
            dispatcher,
            poll_interval,
            running: Arc::new(tokio::sync::Mutex::new(JoinSet::new())),
            busy: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<FleetScheduler> {
        &self.scheduler
    }

    fn is_busy(&self, agent: &str) -> bool {
        self.busy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(agent)
    }

    /// One pass over the fleet. Failures on one agent are logged and do not
    /// stop the pass.
    pub async fn tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();
        let mut running = self.running.lock().await;

        while let Some(joined) = running.try_join_next() {
            Self::collect(joined, &mut report.finished);
        }

        for agent in self.registry.list_agents() {
            report.agents_checked += 1;
            let name = agent.name.clone();

            if self.is_busy(&name) {
                report.busy.push(name);
                continue;
            }

            match self.poll_agent(&agent) {
                Ok(AgentPoll::Unavailable) => report.unavailable.push(name),
                Ok(AgentPoll::Idle) => report.idle.push(name),
                Ok(AgentPoll::Ready(task)) => {
                    report.dispatched.push(Dispatched {
                        agent: name.clone(),
                        task_id: task.id,
                        task_name: task.name.clone(),
                    });

                    self.busy
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(name.clone());
                    let guard = BusyGuard {
                        busy: self.busy.clone(),
                        agent: name,
                    };
                    let this = self.clone();
                    running.spawn(async move {
                        let _guard = guard;
                        this.run_task(agent, task).await
                    });
                }
                Err(e) => {
                    log::error!("Skipping agent {} this tick: {:#}", name, e);
                    report.unavailable.push(name);
                }
            }
        }

        Ok(report)
    }

    /// Waits for every run in flight and returns their results.
    pub async fn drain(&self) -> Vec<TaskRun> {
        let mut finished = Vec::new();
        let mut running = self.running.lock().await;
        while let Some(joined) = running.join_next().await {
            Self::collect(joined, &mut finished);
        }
        finished
    }

    fn collect(
        joined: std::result::Result<Result<TaskRun>, tokio::task::JoinError>,
        finished: &mut Vec<TaskRun>,
    ) {
        match joined {
            Ok(Ok(run)) => finished.push(run),
            Ok(Err(e)) => log::error!("Failed to record task result: {:#}", e),
            Err(e) => log::error!("Dispatch task panicked or was cancelled: {}", e),
        }
    }

    /// Agents parked in IDLE or ERROR are left alone. Any other agent the
    /// driver reaches counts as alive, which also revives agents that went
    /// stale while nothing was polling them.
    fn poll_agent(&self, agent: &Agent) -> Result<AgentPoll> {
        if matches!(agent.status, AgentStatus::Idle | AgentStatus::Error) {
            self.registry.check_health(&agent.name)?;
            return Ok(AgentPoll::Unavailable);
        }

        self.registry
            .update_heartbeat(&agent.name, AgentStatus::Online, None, None)?;
        if self.registry.check_health(&agent.name)? == Some(AgentHealth::Critical) {
            return Ok(AgentPoll::Unavailable);
        }

        match self
            .scheduler
            .get_next_task(&agent.name, self.registry.as_ref())?
        {
            Some(task) => Ok(AgentPoll::Ready(task)),
            None => Ok(AgentPoll::Idle),
        }
    }

    async fn run_task(&self, agent: Agent, task: ScheduleTask) -> Result<TaskRun> {
        log::info!(
            "Dispatching '{}' ({}) to {}",
            task.name,
            task.mode,
            agent.name
        );
        self.scheduler
            .update_task_status(task.id, TaskStatus::Running, None, None)?;
        self.registry
            .update_heartbeat(&agent.name, AgentStatus::Busy, Some(task.mode.clone()), None)?;

        let outcome = self.dispatch_with_keepalive(&agent, &task).await?;

        if outcome.success {
            self.scheduler
                .update_task_status(task.id, TaskStatus::Completed, Some(true), None)?;
        } else {
            let message = outcome.message.as_deref().unwrap_or("task failed");
            self.scheduler
                .update_task_status(task.id, TaskStatus::Failed, Some(false), Some(message))?;
            self.registry.report_error(&agent.name, message)?;
        }

        self.registry.update_heartbeat(
            &agent.name,
            AgentStatus::Online,
            None,
            Some(outcome.metrics.clone()),
        )?;

        Ok(TaskRun {
            agent: agent.name,
            task_id: task.id,
            task_name: task.name,
            mode: task.mode,
            success: outcome.success,
            message: outcome.message,
        })
    }

    /// Keeps the agent's heartbeat fresh while a long task runs so the health
    /// check does not mark a busy agent as offline.
    async fn dispatch_with_keepalive(
        &self,
        agent: &Agent,
        task: &ScheduleTask,
    ) -> Result<DispatchOutcome> {
        let every = (self.registry.policy().stale_after_secs / 3).max(1) as u64;
        let mut keepalive = tokio::time::interval(Duration::from_secs(every));
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keepalive.tick().await;

        let dispatch = self.dispatcher.dispatch(agent, task);
        tokio::pin!(dispatch);

        loop {
            tokio::select! {
                result = &mut dispatch => {
                    return Ok(result.unwrap_or_else(|e| {
                        log::warn!("Could not start '{}' on {}: {:#}", task.name, agent.name, e);
                        DispatchOutcome::failed(format!("{:#}", e))
                    }));
                }
                _ = keepalive.tick() => {
                    self.registry.update_heartbeat(
                        &agent.name,
                        AgentStatus::Busy,
                        Some(task.mode.clone()),
                        None,
                    )?;
                }
            }
        }
    }

    /// Ticks every poll interval until `shutdown` resolves, then waits for
    /// the runs still in flight.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        log::info!(
            "Orchestrator started: {} agents, {} tasks, polling every {}s",
            self.registry.len(),
            self.scheduler.len(),
            self.poll_interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Shutdown requested, waiting for running tasks");
                    break;
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(report) => {
                            if !report.dispatched.is_empty() || !report.finished.is_empty() {
                                log::info!(
                                    "Tick: {} dispatched, {} finished, {} failed",
                                    report.dispatched.len(),
                                    report.finished.len(),
                                    report.failures()
                                );
                            }
                        }
                        Err(e) => log::error!("Tick failed: {:#}", e),
                    }
                }
            }
        }

        let finished = self.drain().await;
        log::info!("Orchestrator stopped, {} runs finished during shutdown", finished.len());
        Ok(())
    }
}

enum AgentPoll {
    Unavailable,
    Idle,
    Ready(ScheduleTask),
}
