//! Scheduled work items and per-agent selection of the next eligible one.

pub mod eligibility;

pub use eligibility::Ineligible;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::Result;
use crate::lifecycle::{StatusUpdate, TaskLifecycle, Transition};
use crate::registry::AgentDirectory;
use crate::storage::{InMemoryStore, RecordStore};
use crate::types::{
    AntiPatternRule, NewTask, ScheduleTask, ScheduleWindow, TaskId, TaskPriority, TaskStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSummary {
    pub total_tasks: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
    pub active_windows: Vec<String>,
    pub priority_multiplier: f64,
}

#[derive(Default)]
struct ScheduleState {
    tasks: HashMap<TaskId, ScheduleTask>,
    windows: BTreeMap<String, ScheduleWindow>,
    rules: BTreeMap<String, AntiPatternRule>,
}

pub struct FleetScheduler {
    state: RwLock<ScheduleState>,
    store: Box<dyn RecordStore<ScheduleTask>>,
}

/// Highest priority first, then the longest-waiting task.
fn dispatch_key(task: &ScheduleTask) -> (Reverse<TaskPriority>, DateTime<Utc>, DateTime<Utc>) {
    (Reverse(task.priority), task.scheduled_for, task.created_at)
}

impl FleetScheduler {
    pub fn load(store: Box<dyn RecordStore<ScheduleTask>>) -> Result<Self> {
        let tasks: HashMap<TaskId, ScheduleTask> =
            store.load()?.into_iter().map(|t| (t.id, t)).collect();

        log::info!("Loaded {} tasks from {}", tasks.len(), store.describe());

        Ok(Self {
            state: RwLock::new(ScheduleState {
                tasks,
                ..Default::default()
            }),
            store,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(ScheduleState::default()),
            store: Box::new(InMemoryStore::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ScheduleState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ScheduleState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, tasks: &HashMap<TaskId, ScheduleTask>) -> Result<()> {
        let mut records: Vec<ScheduleTask> = tasks.values().cloned().collect();
        records.sort_by(|a, b| {
            a.agent_name
                .cmp(&b.agent_name)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        self.store.save(&records)
    }

    pub fn create_task(&self, new: NewTask) -> Result<ScheduleTask> {
        let task = ScheduleTask::from_new(new, Utc::now());

        let mut state = self.write();
        state.tasks.insert(task.id, task.clone());
        self.persist(&state.tasks)?;

        log::info!(
            "Created task {} '{}' ({}) for {} at {} [{}]",
            task.id,
            task.name,
            task.mode,
            task.agent_name,
            task.scheduled_for,
            task.priority
        );
        Ok(task)
    }

    pub fn get_next_task(
        &self,
        agent_name: &str,
        directory: &dyn AgentDirectory,
    ) -> Result<Option<ScheduleTask>> {
        self.get_next_task_at(agent_name, directory, Utc::now())
    }

    /// Picks the highest-priority eligible task for the agent, oldest first on ties.
    pub fn get_next_task_at(
        &self,
        agent_name: &str,
        directory: &dyn AgentDirectory,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduleTask>> {
        let capabilities = directory.capabilities_of(agent_name);
        let mut guard = self.write();
        let state = &mut *guard;

        let mut rolled = false;
        for task in state.tasks.values_mut().filter(|t| t.agent_name == agent_name) {
            rolled |= TaskLifecycle::roll_counters(task, now);
        }

        let rules = &state.rules;
        let next = state
            .tasks
            .values()
            .filter(|t| t.agent_name == agent_name)
            .filter(|t| match eligibility::check(t, rules, capabilities.as_ref(), now) {
                Ok(()) => true,
                Err(Ineligible::NotPending) | Err(Ineligible::NotYetDue) => false,
                Err(Ineligible::UnresolvedRule) => {
                    log::warn!(
                        "Holding task {} '{}': references an unloaded anti-pattern rule",
                        t.id,
                        t.name
                    );
                    false
                }
                Err(reason) => {
                    log::debug!("Skipping task {} '{}': {:?}", t.id, t.name, reason);
                    false
                }
            })
            .min_by_key(|t| dispatch_key(t))
            .cloned();

        if rolled {
            self.persist(&state.tasks)?;
        }

        if let Some(task) = &next {
            log::debug!(
                "Next task for {}: {} '{}' [{}]",
                agent_name,
                task.id,
                task.name,
                task.priority
            );
        }
        Ok(next)
    }

    pub fn update_task_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        success: Option<bool>,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let update = StatusUpdate {
            status,
            success,
            error_message: error_message.map(str::to_string),
        };
        self.apply_status_at(task_id, update, Utc::now())
    }

    /// Unknown ids are a no-op and return `false`.
    pub fn apply_status_at(
        &self,
        task_id: TaskId,
        update: StatusUpdate,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.write();
        let Some(task) = state.tasks.get_mut(&task_id) else {
            log::debug!("Status update for unknown task {}", task_id);
            return Ok(false);
        };

        let transition = TaskLifecycle::apply(task, update, now);
        match transition {
            Transition::Failed => log::warn!(
                "Task {} '{}' failed ({} errors): {}",
                task.id,
                task.name,
                task.error_count,
                task.last_error.as_deref().unwrap_or("unknown error")
            ),
            _ => log::info!("Task {} '{}' {:?}", task.id, task.name, transition),
        }

        self.persist(&state.tasks)?;
        Ok(true)
    }

    /// Puts a task back in the queue at `at`, keeping its counters and error record.
    pub fn reschedule_task(&self, task_id: TaskId, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.write();
        let Some(task) = state.tasks.get_mut(&task_id) else {
            return Ok(false);
        };

        if task.status != TaskStatus::Pending {
            TaskLifecycle::apply(task, StatusUpdate::new(TaskStatus::Pending), Utc::now());
        }
        task.scheduled_for = at;
        log::info!("Rescheduled task {} '{}' for {}", task.id, task.name, at);

        self.persist(&state.tasks)?;
        Ok(true)
    }

    pub fn cancel_task(&self, task_id: TaskId) -> Result<bool> {
        self.apply_status_at(task_id, StatusUpdate::new(TaskStatus::Cancelled), Utc::now())
    }

    pub fn remove_task(&self, task_id: TaskId) -> Result<bool> {
        let mut state = self.write();
        if state.tasks.remove(&task_id).is_none() {
            return Ok(false);
        }
        self.persist(&state.tasks)?;
        Ok(true)
    }

    pub fn reset_daily_counts(&self) -> Result<usize> {
        self.reset_counts(|task| {
            task.current_daily_count = 0;
        })
    }

    pub fn reset_weekly_counts(&self) -> Result<usize> {
        self.reset_counts(|task| {
            task.current_weekly_count = 0;
        })
    }

    fn reset_counts(&self, reset: impl Fn(&mut ScheduleTask)) -> Result<usize> {
        let mut state = self.write();
        let now = Utc::now();
        for task in state.tasks.values_mut() {
            reset(task);
            task.counts_reset_at = now;
        }
        let count = state.tasks.len();
        self.persist(&state.tasks)?;
        Ok(count)
    }

    pub fn add_schedule_window(&self, name: &str, window: ScheduleWindow) {
        log::debug!("Schedule window '{}' registered", name);
        self.write().windows.insert(name.to_string(), window);
    }

    pub fn add_anti_pattern_rule(&self, name: &str, rule: AntiPatternRule) {
        log::debug!("Anti-pattern rule '{}' ({}) registered", name, rule.kind());
        self.write().rules.insert(name.to_string(), rule);
    }

    pub fn active_windows_at(&self, now: DateTime<Utc>) -> Vec<String> {
        self.read()
            .windows
            .iter()
            .filter(|(_, w)| w.is_active(now))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Advisory only: selection order never depends on it.
    pub fn priority_multiplier_at(&self, now: DateTime<Utc>) -> f64 {
        self.read()
            .windows
            .values()
            .filter(|w| w.is_active(now))
            .map(|w| w.priority_multiplier)
            .fold(None, |acc: Option<f64>, m| Some(acc.map_or(m, |a| a.max(m))))
            .unwrap_or(1.0)
    }

    pub fn get_task(&self, task_id: TaskId) -> Option<ScheduleTask> {
        self.read().tasks.get(&task_id).cloned()
    }

    pub fn find_task(&self, agent_name: &str, name: &str) -> Option<ScheduleTask> {
        self.read()
            .tasks
            .values()
            .find(|t| t.agent_name == agent_name && t.name == name)
            .cloned()
    }

    /// The agent's tasks in dispatch order.
    pub fn get_tasks_for_agent(&self, agent_name: &str) -> Vec<ScheduleTask> {
        let mut tasks: Vec<ScheduleTask> = self
            .read()
            .tasks
            .values()
            .filter(|t| t.agent_name == agent_name)
            .cloned()
            .collect();
        tasks.sort_by_key(dispatch_key);
        tasks
    }

    pub fn list_tasks(&self) -> Vec<ScheduleTask> {
        let mut tasks: Vec<ScheduleTask> = self.read().tasks.values().cloned().collect();
        tasks.sort_by(|a, b| {
            a.agent_name
                .cmp(&b.agent_name)
                .then_with(|| dispatch_key(a).cmp(&dispatch_key(b)))
        });
        tasks
    }

    pub fn len(&self) -> usize {
        self.read().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().tasks.is_empty()
    }

    pub fn get_schedule_summary(&self) -> ScheduleSummary {
        self.get_schedule_summary_at(Utc::now())
    }

    pub fn get_schedule_summary_at(&self, now: DateTime<Utc>) -> ScheduleSummary {
        let (total_tasks, by_status, by_priority) = {
            let state = self.read();
            let mut by_status = BTreeMap::new();
            let mut by_priority = BTreeMap::new();
            for task in state.tasks.values() {
                *by_status.entry(task.status.to_string()).or_insert(0) += 1;
                *by_priority.entry(task.priority.to_string()).or_insert(0) += 1;
            }
            (state.tasks.len(), by_status, by_priority)
        };

        ScheduleSummary {
            total_tasks,
            by_status,
            by_priority,
            active_windows: self.active_windows_at(now),
            priority_multiplier: self.priority_multiplier_at(now),
        }
    }
}
