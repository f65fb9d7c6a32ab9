use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::{AntiPatternRule, Capability, TaskId, TaskPriority, TaskStatus};

const DEFAULT_ESTIMATED_DURATION_SECS: i64 = 30 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    DailyCap,
    WeeklyCap,
    AgentCapability,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConstraintValue {
    Count(u32),
    Capability(Capability),
}

/// Either the name of a rule registered on the scheduler or a rule spelled out in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleRef {
    Named(String),
    Inline(AntiPatternRule),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleTask {
    pub id: TaskId,
    pub name: String,
    pub mode: String,
    pub agent_name: String,
    pub priority: TaskPriority,
    pub scheduled_for: DateTime<Utc>,
    pub estimated_duration_secs: i64,
    pub status: TaskStatus,

    #[serde(default)]
    pub constraints: BTreeMap<ConstraintKind, ConstraintValue>,
    #[serde(default)]
    pub daily_cap: Option<u32>,
    #[serde(default)]
    pub current_daily_count: u32,
    #[serde(default)]
    pub weekly_cap: Option<u32>,
    #[serde(default)]
    pub current_weekly_count: u32,
    #[serde(default)]
    pub anti_pattern_rules: Vec<RuleRef>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_failed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub counts_reset_at: DateTime<Utc>,
}

/// Everything a caller may say about a task before it exists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    pub mode: String,
    pub agent_name: String,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub estimated_duration_secs: Option<i64>,
    #[serde(default)]
    pub constraints: BTreeMap<ConstraintKind, ConstraintValue>,
    #[serde(default)]
    pub daily_cap: Option<u32>,
    #[serde(default)]
    pub weekly_cap: Option<u32>,
    #[serde(default)]
    pub anti_pattern_rules: Vec<RuleRef>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl NewTask {
    pub fn new(
        name: impl Into<String>,
        mode: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            mode: mode.into(),
            agent_name: agent_name.into(),
            ..Default::default()
        }
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    pub fn estimated_duration(mut self, duration: Duration) -> Self {
        self.estimated_duration_secs = Some(duration.num_seconds());
        self
    }

    pub fn constraint(mut self, kind: ConstraintKind, value: ConstraintValue) -> Self {
        self.constraints.insert(kind, value);
        self
    }

    pub fn requires(self, capability: Capability) -> Self {
        self.constraint(
            ConstraintKind::AgentCapability,
            ConstraintValue::Capability(capability),
        )
    }

    pub fn daily_cap(mut self, cap: u32) -> Self {
        self.daily_cap = Some(cap);
        self
    }

    pub fn weekly_cap(mut self, cap: u32) -> Self {
        self.weekly_cap = Some(cap);
        self
    }

    pub fn rule(mut self, rule: RuleRef) -> Self {
        self.anti_pattern_rules.push(rule);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

impl ScheduleTask {
    pub fn from_new(new: NewTask, now: DateTime<Utc>) -> Self {
        let daily_cap = new
            .daily_cap
            .or_else(|| count_constraint(&new.constraints, ConstraintKind::DailyCap));
        let weekly_cap = new
            .weekly_cap
            .or_else(|| count_constraint(&new.constraints, ConstraintKind::WeeklyCap));

        Self {
            id: TaskId::new_v4(),
            name: new.name,
            mode: new.mode,
            agent_name: new.agent_name,
            priority: new.priority.unwrap_or_default(),
            scheduled_for: new.scheduled_for.unwrap_or(now),
            estimated_duration_secs: new
                .estimated_duration_secs
                .unwrap_or(DEFAULT_ESTIMATED_DURATION_SECS),
            status: TaskStatus::Pending,
            constraints: new.constraints,
            daily_cap,
            current_daily_count: 0,
            weekly_cap,
            current_weekly_count: 0,
            anti_pattern_rules: new.anti_pattern_rules,
            started_at: None,
            completed_at: None,
            error_count: 0,
            last_error: None,
            last_failed_at: None,
            metadata: new.metadata,
            created_at: now,
            counts_reset_at: now,
        }
    }

    pub fn required_capability(&self) -> Option<Capability> {
        match self.constraints.get(&ConstraintKind::AgentCapability) {
            Some(ConstraintValue::Capability(capability)) => Some(*capability),
            _ => None,
        }
    }

    pub fn daily_cap_reached(&self) -> bool {
        self.daily_cap
            .is_some_and(|cap| self.current_daily_count >= cap)
    }

    pub fn weekly_cap_reached(&self) -> bool {
        self.weekly_cap
            .is_some_and(|cap| self.current_weekly_count >= cap)
    }

    /// Saturates at `Duration::MAX` for values chrono cannot represent.
    pub fn estimated_duration(&self) -> Duration {
        Duration::try_seconds(self.estimated_duration_secs).unwrap_or(Duration::MAX)
    }
}

fn count_constraint(
    constraints: &BTreeMap<ConstraintKind, ConstraintValue>,
    kind: ConstraintKind,
) -> Option<u32> {
    match constraints.get(&kind) {
        Some(ConstraintValue::Count(count)) => Some(*count),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let now = Utc::now();
        let task = ScheduleTask::from_new(NewTask::new("daily quests", "quest", "alpha"), now);

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, TaskPriority::Medium);
        assert_eq!(task.scheduled_for, now);
        assert_eq!(task.estimated_duration(), Duration::minutes(30));
        assert!(task.daily_cap.is_none());
        assert!(task.required_capability().is_none());
    }

    #[test]
    fn test_unrepresentable_duration_saturates() {
        let mut task = ScheduleTask::from_new(NewTask::new("afk", "travel", "alpha"), Utc::now());
        task.estimated_duration_secs = i64::MAX;

        assert_eq!(task.estimated_duration(), Duration::MAX);
    }

    #[test]
    fn test_cap_constraints_fill_cap_fields() {
        let new = NewTask::new("grind", "combat", "alpha")
            .constraint(ConstraintKind::DailyCap, ConstraintValue::Count(3))
            .constraint(ConstraintKind::WeeklyCap, ConstraintValue::Count(10))
            .requires(Capability::Combat);
        let task = ScheduleTask::from_new(new, Utc::now());

        assert_eq!(task.daily_cap, Some(3));
        assert_eq!(task.weekly_cap, Some(10));
        assert_eq!(task.required_capability(), Some(Capability::Combat));
    }

    #[test]
    fn test_explicit_cap_wins_over_constraint() {
        let new = NewTask::new("grind", "combat", "alpha")
            .constraint(ConstraintKind::DailyCap, ConstraintValue::Count(3))
            .daily_cap(1);
        let task = ScheduleTask::from_new(new, Utc::now());

        assert_eq!(task.daily_cap, Some(1));
    }

    #[test]
    fn test_cap_reached() {
        let new = NewTask::new("grind", "combat", "alpha").daily_cap(2);
        let mut task = ScheduleTask::from_new(new, Utc::now());
        assert!(!task.daily_cap_reached());
        task.current_daily_count = 2;
        assert!(task.daily_cap_reached());
        assert!(!task.weekly_cap_reached());
    }

    #[test]
    fn test_rule_refs_parse_named_and_inline() {
        let json = r#"["night_block", {"type": "failure_cooldown", "cooldown_secs": 600}]"#;
        let rules: Vec<RuleRef> = serde_json::from_str(json).unwrap();

        assert_eq!(rules[0], RuleRef::Named("night_block".to_string()));
        assert_eq!(
            rules[1],
            RuleRef::Inline(AntiPatternRule::FailureCooldown { cooldown_secs: 600 })
        );
    }

    #[test]
    fn test_constraint_map_roundtrip_through_json() {
        let new = NewTask::new("survey", "survey", "alpha")
            .requires(Capability::Survey)
            .constraint(ConstraintKind::DailyCap, ConstraintValue::Count(4));
        let task = ScheduleTask::from_new(new, Utc::now());

        let json = serde_json::to_string(&task).unwrap();
        assert!(json.contains("\"agent_capability\":\"survey\""));

        let restored: ScheduleTask = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.required_capability(), Some(Capability::Survey));
        assert_eq!(restored.daily_cap, Some(4));
    }
}
