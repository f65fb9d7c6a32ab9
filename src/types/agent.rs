use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use super::{AgentHealth, AgentStatus, Capability, CapabilitySet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub name: String,
    pub machine_id: String,
    pub window_id: String,
    pub capabilities: CapabilitySet,
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    pub status: AgentStatus,
    pub health: AgentHealth,
    #[serde(default)]
    pub current_mode: Option<String>,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub performance_metrics: HashMap<String, f64>,
    #[serde(default)]
    pub error_history: VecDeque<ErrorEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        machine_id: impl Into<String>,
        window_id: impl Into<String>,
        capabilities: CapabilitySet,
        config_path: Option<PathBuf>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            machine_id: machine_id.into(),
            window_id: window_id.into(),
            capabilities,
            config_path,
            status: AgentStatus::Online,
            health: AgentHealth::Healthy,
            current_mode: None,
            error_count: 0,
            last_error: None,
            last_heartbeat: now,
            registered_at: now,
            performance_metrics: HashMap::new(),
            error_history: VecDeque::new(),
        }
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn heartbeat_age_secs(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.last_heartbeat).num_seconds()
    }

    pub fn is_available(&self) -> bool {
        matches!(self.status, AgentStatus::Online | AgentStatus::Busy)
            && self.health != AgentHealth::Critical
    }
}
