use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{FleetError, Result};
use crate::lifecycle::HealthPolicy;

const AGENTS_FILE: &str = "agents.json";
const SCHEDULE_FILE: &str = "schedule.json";

/// How to launch the automation script for one task mode.
///
/// `{agent}`, `{task}`, `{window}` and `{mode}` inside `args` are replaced
/// before the command is spawned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub log_level: String,
    pub poll_interval_secs: u64,
    pub plan_path: Option<PathBuf>,
    pub health: HealthPolicy,
    pub commands: BTreeMap<String, CommandSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("fleet-data"),
            log_level: "info".to_string(),
            poll_interval_secs: 10,
            plan_path: None,
            health: HealthPolicy::default(),
            commands: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Reads the TOML file if given, then lets `MS11_*` environment variables override it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|e| FleetError::storage(path, e))?;
                Self::from_toml_str(&content)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| FleetError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(dir) = lookup("MS11_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup("MS11_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(plan) = lookup("MS11_PLAN") {
            self.plan_path = Some(PathBuf::from(plan));
        }
        if let Some(secs) = parse_var(&lookup, "MS11_POLL_INTERVAL_SECS")? {
            self.poll_interval_secs = secs;
        }
        if let Some(secs) = parse_var(&lookup, "MS11_HEARTBEAT_STALE_SECS")? {
            self.health.stale_after_secs = secs;
        }
        if let Some(secs) = parse_var(&lookup, "MS11_ERROR_WINDOW_SECS")? {
            self.health.error_window_secs = secs;
        }
        Ok(())
    }

    pub fn agents_path(&self) -> PathBuf {
        self.data_dir.join(AGENTS_FILE)
    }

    pub fn schedule_path(&self) -> PathBuf {
        self.data_dir.join(SCHEDULE_FILE)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| FleetError::Config(format!("{} has an invalid value: {}", key, raw))),
        None => Ok(None),
    }
}
