pub mod agent;
pub mod task;
pub mod window;

pub use agent::{Agent, ErrorEvent};
pub use task::{ConstraintKind, ConstraintValue, NewTask, RuleRef, ScheduleTask};
pub use window::{AntiPatternRule, ScheduleWindow, TimeRange};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type TaskId = Uuid;
pub type CapabilitySet = BTreeSet<Capability>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Quest,
    Combat,
    Crafting,
    Medic,
    Entertainer,
    Trader,
    Survey,
    Travel,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Quest => "quest",
            Capability::Combat => "combat",
            Capability::Crafting => "crafting",
            Capability::Medic => "medic",
            Capability::Entertainer => "entertainer",
            Capability::Trader => "trader",
            Capability::Survey => "survey",
            Capability::Travel => "travel",
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            Capability::Quest,
            Capability::Combat,
            Capability::Crafting,
            Capability::Medic,
            Capability::Entertainer,
            Capability::Trader,
            Capability::Survey,
            Capability::Travel,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,  // Registered and polling for work
    Busy,    // Running a task
    Idle,    // Connected, deliberately not taking work
    Offline, // Heartbeat went stale
    Error,   // Worker reported it cannot continue
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Online => "online",
            AgentStatus::Busy => "busy",
            AgentStatus::Idle => "idle",
            AgentStatus::Offline => "offline",
            AgentStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentHealth {
    Healthy,
    Warning,
    Critical,
}

impl AgentHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentHealth::Healthy => "healthy",
            AgentHealth::Warning => "warning",
            AgentHealth::Critical => "critical",
        }
    }
}

/// Declaration order is the dispatch order: later variants win.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Medium => "medium",
            TaskPriority::High => "high",
            TaskPriority::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

macro_rules! impl_from_str {
    ($ty:ty, $kind:literal, [$($variant:expr),+ $(,)?]) => {
        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_ascii_lowercase();
                [$($variant),+]
                    .into_iter()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| ParseEnumError {
                        kind: $kind,
                        value: s.to_string(),
                    })
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_from_str!(
    Capability,
    "capability",
    [
        Capability::Quest,
        Capability::Combat,
        Capability::Crafting,
        Capability::Medic,
        Capability::Entertainer,
        Capability::Trader,
        Capability::Survey,
        Capability::Travel,
    ]
);
impl_from_str!(
    AgentStatus,
    "agent status",
    [
        AgentStatus::Online,
        AgentStatus::Busy,
        AgentStatus::Idle,
        AgentStatus::Offline,
        AgentStatus::Error,
    ]
);
impl_from_str!(
    AgentHealth,
    "agent health",
    [AgentHealth::Healthy, AgentHealth::Warning, AgentHealth::Critical]
);
impl_from_str!(
    TaskPriority,
    "task priority",
    [
        TaskPriority::Low,
        TaskPriority::Medium,
        TaskPriority::High,
        TaskPriority::Critical,
    ]
);
impl_from_str!(
    TaskStatus,
    "task status",
    [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ]
);
