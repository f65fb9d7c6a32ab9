//! The fleet plan: a YAML or JSON document that seeds the registry and the
//! scheduler at startup.
//!
//! ```yaml
//! agents:
//!   - name: alpha
//!     machine_id: rig-01
//!     window_id: swg-1
//!     capabilities: [quest, combat]
//! anti_pattern_rules:
//!   night_off:
//!     type: idle_block
//!     window: { start: "03:00:00", end: "07:00:00" }
//! tasks:
//!   - name: tatooine quests
//!     mode: quest
//!     agent_name: alpha
//!     anti_pattern_rules: [night_off]
//! ```

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{FleetError, Result};
use crate::registry::AgentRegistry;
use crate::scheduler::FleetScheduler;
use crate::types::{
    AntiPatternRule, CapabilitySet, ConstraintKind, NewTask, RuleRef, ScheduleWindow, TaskPriority,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetPlan {
    #[serde(default)]
    pub agents: Vec<AgentPlan>,
    #[serde(default)]
    pub schedule_windows: BTreeMap<String, ScheduleWindow>,
    #[serde(default)]
    pub anti_pattern_rules: BTreeMap<String, AntiPatternRule>,
    #[serde(default)]
    pub tasks: Vec<NewTask>,
    #[serde(default)]
    pub global_constraints: GlobalConstraints,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPlan {
    pub name: String,
    pub machine_id: String,
    pub window_id: String,
    #[serde(default)]
    pub capabilities: CapabilitySet,
    #[serde(default)]
    pub config_path: Option<PathBuf>,
}

/// Defaults for tasks that do not set their own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConstraints {
    #[serde(default)]
    pub default_daily_cap: Option<u32>,
    #[serde(default)]
    pub default_weekly_cap: Option<u32>,
    #[serde(default)]
    pub default_priority: Option<TaskPriority>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanReport {
    pub agents_registered: usize,
    pub agents_skipped: usize,
    pub tasks_created: usize,
    pub tasks_skipped: usize,
    pub windows: usize,
    pub rules: usize,
}

impl FleetPlan {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| FleetError::storage(path, e))?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let plan = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_yaml_str(&content)?
        };
        plan.validate()?;

        log::info!(
            "Loaded fleet plan {}: {} agents, {} tasks",
            path.display(),
            plan.agents.len(),
            plan.tasks.len()
        );
        Ok(plan)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| FleetError::Plan(format!("Failed to parse YAML: {}", e)))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| FleetError::Plan(format!("Failed to parse JSON: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, rule) in &self.anti_pattern_rules {
            check_rule(name, rule)?;
        }

        let mut names = HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(FleetError::Plan("agent with an empty name".to_string()));
            }
            if !names.insert(agent.name.as_str()) {
                return Err(FleetError::Plan(format!(
                    "agent '{}' is listed twice",
                    agent.name
                )));
            }
        }

        for task in &self.tasks {
            if task.agent_name.trim().is_empty() || task.mode.trim().is_empty() {
                return Err(FleetError::Plan(format!(
                    "task '{}' needs both a mode and an agent_name",
                    task.name
                )));
            }
            if !names.contains(task.agent_name.as_str()) {
                log::warn!(
                    "Task '{}' targets agent '{}' which the plan does not declare",
                    task.name,
                    task.agent_name
                );
            }
            if let Some(secs) = task.estimated_duration_secs {
                check_secs(&format!("estimated duration of task '{}'", task.name), secs)?;
            }
            for rule in &task.anti_pattern_rules {
                match rule {
                    RuleRef::Named(name) if !self.anti_pattern_rules.contains_key(name) => {
                        return Err(FleetError::Plan(format!(
                            "task '{}' references undefined rule '{}'",
                            task.name, name
                        )));
                    }
                    RuleRef::Named(_) => {}
                    RuleRef::Inline(rule) => check_rule(&task.name, rule)?,
                }
            }
        }

        Ok(())
    }

    /// Seeds the registry and scheduler. Agents already registered and tasks
    /// already present for the same agent under the same name are left alone,
    /// so applying a plan twice is harmless.
    pub fn apply(
        &self,
        registry: &AgentRegistry,
        scheduler: &FleetScheduler,
    ) -> Result<PlanReport> {
        let mut report = PlanReport::default();

        for (name, window) in &self.schedule_windows {
            scheduler.add_schedule_window(name, window.clone());
            report.windows += 1;
        }
        for (name, rule) in &self.anti_pattern_rules {
            scheduler.add_anti_pattern_rule(name, rule.clone());
            report.rules += 1;
        }

        for agent in &self.agents {
            match registry.register(
                &agent.name,
                &agent.machine_id,
                &agent.window_id,
                agent.capabilities.clone(),
                agent.config_path.clone(),
            ) {
                Ok(_) => report.agents_registered += 1,
                Err(FleetError::DuplicateAgent(name)) => {
                    log::debug!("Agent {} already registered, keeping existing record", name);
                    report.agents_skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        for task in &self.tasks {
            if scheduler.find_task(&task.agent_name, &task.name).is_some() {
                report.tasks_skipped += 1;
                continue;
            }
            scheduler.create_task(self.with_defaults(task.clone()))?;
            report.tasks_created += 1;
        }

        log::info!(
            "Applied fleet plan: {} agents added ({} existing), {} tasks added ({} existing)",
            report.agents_registered,
            report.agents_skipped,
            report.tasks_created,
            report.tasks_skipped
        );
        Ok(report)
    }

    fn with_defaults(&self, mut task: NewTask) -> NewTask {
        let globals = &self.global_constraints;
        if task.priority.is_none() {
            task.priority = globals.default_priority;
        }
        if task.daily_cap.is_none() && !task.constraints.contains_key(&ConstraintKind::DailyCap) {
            task.daily_cap = globals.default_daily_cap;
        }
        if task.weekly_cap.is_none() && !task.constraints.contains_key(&ConstraintKind::WeeklyCap) {
            task.weekly_cap = globals.default_weekly_cap;
        }
        task
    }
}

fn check_rule(owner: &str, rule: &AntiPatternRule) -> Result<()> {
    match rule {
        AntiPatternRule::FailureCooldown { cooldown_secs } => {
            check_secs(&format!("cooldown in '{}'", owner), *cooldown_secs)
        }
        _ => Ok(()),
    }
}

fn check_secs(what: &str, secs: i64) -> Result<()> {
    if secs < 0 || Duration::try_seconds(secs).is_none() {
        return Err(FleetError::Plan(format!("{} is out of range: {}s", what, secs)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Capability, TaskStatus};
    use tempfile::TempDir;

    const PLAN: &str = r#"
agents:
  - name: alpha
    machine_id: rig-01
    window_id: swg-1
    capabilities: [quest, combat]
  - name: bravo
    machine_id: rig-02
    window_id: swg-1
    capabilities: [crafting]
schedule_windows:
  prime_time:
    start: "18:00:00"
    end: "23:00:00"
    priority_multiplier: 1.5
anti_pattern_rules:
  night_off:
    type: idle_block
    window:
      start: "03:00:00"
      end: "07:00:00"
tasks:
  - name: tatooine quests
    mode: quest
    agent_name: alpha
    priority: high
    anti_pattern_rules: [night_off]
  - name: weapon crafting
    mode: crafting
    agent_name: bravo
    constraints:
      agent_capability: crafting
      daily_cap: 4
global_constraints:
  default_daily_cap: 8
"#;

    #[test]
    fn test_parse_yaml_plan() {
        let plan = FleetPlan::from_yaml_str(PLAN).unwrap();
        plan.validate().unwrap();

        assert_eq!(plan.agents.len(), 2);
        assert!(plan.agents[0].capabilities.contains(&Capability::Combat));
        assert_eq!(plan.schedule_windows["prime_time"].priority_multiplier, 1.5);
        assert_eq!(plan.anti_pattern_rules["night_off"].kind(), "idle_block");
        assert_eq!(plan.tasks[0].priority, Some(TaskPriority::High));
    }

    #[test]
    fn test_apply_seeds_registry_and_scheduler() {
        let plan = FleetPlan::from_yaml_str(PLAN).unwrap();
        let registry = AgentRegistry::in_memory();
        let scheduler = FleetScheduler::in_memory();

        let report = plan.apply(&registry, &scheduler).unwrap();
        assert_eq!(report.agents_registered, 2);
        assert_eq!(report.tasks_created, 2);
        assert_eq!(report.windows, 1);
        assert_eq!(report.rules, 1);

        let quests = scheduler.find_task("alpha", "tatooine quests").unwrap();
        assert_eq!(quests.status, TaskStatus::Pending);
        assert_eq!(quests.daily_cap, Some(8));

        let crafting = scheduler.find_task("bravo", "weapon crafting").unwrap();
        assert_eq!(crafting.daily_cap, Some(4));
        assert_eq!(crafting.required_capability(), Some(Capability::Crafting));
    }

    #[test]
    fn test_apply_twice_is_idempotent() {
        let plan = FleetPlan::from_yaml_str(PLAN).unwrap();
        let registry = AgentRegistry::in_memory();
        let scheduler = FleetScheduler::in_memory();

        plan.apply(&registry, &scheduler).unwrap();
        let second = plan.apply(&registry, &scheduler).unwrap();

        assert_eq!(second.agents_registered, 0);
        assert_eq!(second.agents_skipped, 2);
        assert_eq!(second.tasks_skipped, 2);
        assert_eq!(registry.len(), 2);
        assert_eq!(scheduler.len(), 2);
    }

    #[test]
    fn test_duplicate_agent_rejected() {
        let plan = FleetPlan::from_yaml_str(
            r#"
agents:
  - { name: alpha, machine_id: a, window_id: "1" }
  - { name: alpha, machine_id: b, window_id: "2" }
"#,
        )
        .unwrap();

        assert!(matches!(plan.validate(), Err(FleetError::Plan(_))));
    }

    #[test]
    fn test_undefined_rule_rejected() {
        let plan = FleetPlan::from_yaml_str(
            r#"
tasks:
  - { name: q, mode: quest, agent_name: alpha, anti_pattern_rules: [missing] }
"#,
        )
        .unwrap();

        assert!(matches!(plan.validate(), Err(FleetError::Plan(_))));
    }

    #[test]
    fn test_out_of_range_seconds_rejected() {
        let named = FleetPlan::from_yaml_str(
            r#"
anti_pattern_rules:
  forever:
    type: failure_cooldown
    cooldown_secs: 9223372036854775807
"#,
        )
        .unwrap();
        assert!(matches!(named.validate(), Err(FleetError::Plan(_))));

        let inline = FleetPlan::from_yaml_str(
            r#"
tasks:
  - name: q
    mode: quest
    agent_name: alpha
    anti_pattern_rules:
      - { type: failure_cooldown, cooldown_secs: -5 }
"#,
        )
        .unwrap();
        assert!(matches!(inline.validate(), Err(FleetError::Plan(_))));

        let duration = FleetPlan::from_yaml_str(
            r#"
tasks:
  - { name: q, mode: quest, agent_name: alpha, estimated_duration_secs: 9223372036854775807 }
"#,
        )
        .unwrap();
        assert!(matches!(duration.validate(), Err(FleetError::Plan(_))));
    }

    #[test]
    fn test_load_json_plan_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fleet.json");
        fs::write(
            &path,
            r#"{"agents": [{"name": "alpha", "machine_id": "rig-01", "window_id": "1",
                 "capabilities": ["survey"]}],
                "tasks": [{"name": "survey run", "mode": "survey", "agent_name": "alpha"}]}"#,
        )
        .unwrap();

        let plan = FleetPlan::load(&path).unwrap();
        assert_eq!(plan.agents[0].capabilities.len(), 1);
        assert_eq!(plan.tasks[0].mode, "survey");
    }
}
