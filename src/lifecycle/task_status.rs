use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ScheduleTask, TaskStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: TaskStatus,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl StatusUpdate {
    pub fn new(status: TaskStatus) -> Self {
        Self {
            status,
            success: None,
            error_message: None,
        }
    }

    pub fn running() -> Self {
        Self::new(TaskStatus::Running)
    }

    pub fn completed() -> Self {
        Self {
            status: TaskStatus::Completed,
            success: Some(true),
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            success: Some(false),
            error_message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Started,
    Completed,
    Failed,
    Cancelled,
    Requeued,
}

pub struct TaskLifecycle;

impl TaskLifecycle {
    pub fn is_expected(from: TaskStatus, to: TaskStatus) -> bool {
        matches!(
            (from, to),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Completed)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Pending, TaskStatus::Cancelled)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Cancelled)
                | (
                    TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled,
                    TaskStatus::Pending
                )
        )
    }

    /// Applies a status change with its side effects.
    ///
    /// Unexpected transitions are logged and applied anyway; the worker that
    /// reports a status is the source of truth for what actually happened.
    pub fn apply(task: &mut ScheduleTask, update: StatusUpdate, now: DateTime<Utc>) -> Transition {
        if !Self::is_expected(task.status, update.status) {
            log::warn!(
                "Unexpected status change for task {} ({}): {} -> {}",
                task.id,
                task.name,
                task.status,
                update.status
            );
        }

        task.status = update.status;

        match update.status {
            TaskStatus::Pending => {
                task.started_at = None;
                Transition::Requeued
            }
            TaskStatus::Running => {
                task.started_at = Some(now);
                task.completed_at = None;
                Transition::Started
            }
            TaskStatus::Completed => {
                task.completed_at = Some(now);
                if update.success == Some(false) {
                    Self::record_failure(task, update.error_message, now);
                    Transition::Failed
                } else {
                    task.current_daily_count += 1;
                    task.current_weekly_count += 1;
                    Transition::Completed
                }
            }
            TaskStatus::Failed => {
                task.completed_at = Some(now);
                Self::record_failure(task, update.error_message, now);
                Transition::Failed
            }
            TaskStatus::Cancelled => {
                task.completed_at = Some(now);
                Transition::Cancelled
            }
        }
    }

    fn record_failure(task: &mut ScheduleTask, message: Option<String>, now: DateTime<Utc>) {
        task.error_count += 1;
        task.last_failed_at = Some(now);
        task.last_error = Some(message.unwrap_or_else(|| "task failed".to_string()));
    }

    /// Resets cap counters once a UTC day or ISO week boundary has passed.
    pub fn roll_counters(task: &mut ScheduleTask, now: DateTime<Utc>) -> bool {
        let last = task.counts_reset_at;
        let mut rolled = false;

        if now.date_naive() > last.date_naive() {
            task.current_daily_count = 0;
            rolled = true;
        }
        if now.iso_week() != last.iso_week() && now > last {
            task.current_weekly_count = 0;
            rolled = true;
        }

        if rolled {
            task.counts_reset_at = now;
        }
        rolled
    }
}
