use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::config::CommandSpec;
use crate::types::{Agent, ScheduleTask};

const DEFAULT_TIMEOUT_SECS: u64 = 3600;
const MESSAGE_LIMIT: usize = 500;

/// What a dispatcher reports back after running one task on one agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub success: bool,
    pub message: Option<String>,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
}

impl DispatchOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            metrics: HashMap::new(),
        }
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }
}

/// Executes a task on an agent's game window.
///
/// An `Err` means the task could not be started at all; a task that ran and
/// failed comes back as an outcome with `success == false`.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, agent: &Agent, task: &ScheduleTask) -> Result<DispatchOutcome>;
}

/// Runs one external command per task mode, as configured under `[commands]`.
pub struct CommandDispatcher {
    commands: BTreeMap<String, CommandSpec>,
    default_timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(commands: BTreeMap<String, CommandSpec>) -> Self {
        Self {
            commands,
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    fn render_args(spec: &CommandSpec, agent: &Agent, task: &ScheduleTask) -> Vec<String> {
        let task_id = task.id.to_string();
        spec.args
            .iter()
            .map(|arg| {
                arg.replace("{agent}", &agent.name)
                    .replace("{task}", &task_id)
                    .replace("{window}", &agent.window_id)
                    .replace("{mode}", &task.mode)
            })
            .collect()
    }
}

#[async_trait]
impl Dispatcher for CommandDispatcher {
    async fn dispatch(&self, agent: &Agent, task: &ScheduleTask) -> Result<DispatchOutcome> {
        let spec = self
            .commands
            .get(&task.mode)
            .ok_or_else(|| anyhow!("No command configured for mode '{}'", task.mode))?;

        let timeout = spec
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let mut command = Command::new(&spec.program);
        command
            .args(Self::render_args(spec, agent, task))
            .env("MS11_AGENT", &agent.name)
            .env("MS11_TASK_ID", task.id.to_string())
            .env("MS11_MODE", &task.mode)
            .env("MS11_WINDOW_ID", &agent.window_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::debug!(
            "Spawning {} for task {} on {}",
            spec.program,
            task.id,
            agent.name
        );

        let started = Instant::now();
        let child = command
            .spawn()
            .with_context(|| format!("Failed to spawn '{}'", spec.program))?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output.with_context(|| format!("Failed to wait on '{}'", spec.program))?,
            Err(_) => {
                return Ok(DispatchOutcome::failed(format!(
                    "'{}' timed out after {}s",
                    spec.program,
                    timeout.as_secs()
                ))
                .with_metric("last_run_secs", started.elapsed().as_secs_f64()));
            }
        };

        let elapsed = started.elapsed().as_secs_f64();
        let outcome = if output.status.success() {
            DispatchOutcome::succeeded()
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim();
            let detail = if detail.len() > MESSAGE_LIMIT {
                let mut cut = detail.len() - MESSAGE_LIMIT;
                while !detail.is_char_boundary(cut) {
                    cut += 1;
                }
                &detail[cut..]
            } else {
                detail
            };
            DispatchOutcome::failed(format!("{} ({})", output.status, detail))
        };

        Ok(outcome.with_metric("last_run_secs", elapsed))
    }
}
