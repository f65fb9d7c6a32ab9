use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use crate::types::{AntiPatternRule, CapabilitySet, RuleRef, ScheduleTask, TaskStatus};

/// Why a task was passed over during selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    NotPending,
    NotYetDue,
    DailyCapReached,
    WeeklyCapReached,
    BlockedByRule(&'static str),
    UnresolvedRule,
    UnknownAgent,
    MissingCapability,
}

pub fn rule_blocks(rule: &AntiPatternRule, task: &ScheduleTask, now: DateTime<Utc>) -> bool {
    match rule {
        // Blocks for the whole window regardless of priority, so a full-day
        // window keeps the task off the schedule entirely.
        AntiPatternRule::IdleBlock { window } => window.contains(now),
        // A cooldown too long to represent never expires.
        AntiPatternRule::FailureCooldown { cooldown_secs } => {
            task.last_failed_at.is_some_and(|failed_at| {
                Duration::try_seconds(*cooldown_secs)
                    .and_then(|cooldown| failed_at.checked_add_signed(cooldown))
                    .map_or(true, |until| now < until)
            })
        }
        AntiPatternRule::MaxRunsPerDay { max } => task.current_daily_count >= *max,
    }
}

/// A name the scheduler has no rule for resolves to `None`.
fn resolve_rule<'a>(
    rule_ref: &'a RuleRef,
    registered: &'a BTreeMap<String, AntiPatternRule>,
) -> Option<&'a AntiPatternRule> {
    match rule_ref {
        RuleRef::Inline(rule) => Some(rule),
        RuleRef::Named(name) => registered.get(name),
    }
}

/// `agent_capabilities` is `None` when the target agent is not registered.
pub fn check(
    task: &ScheduleTask,
    registered_rules: &BTreeMap<String, AntiPatternRule>,
    agent_capabilities: Option<&CapabilitySet>,
    now: DateTime<Utc>,
) -> Result<(), Ineligible> {
    if task.status != TaskStatus::Pending {
        return Err(Ineligible::NotPending);
    }
    if task.scheduled_for > now {
        return Err(Ineligible::NotYetDue);
    }
    if task.daily_cap_reached() {
        return Err(Ineligible::DailyCapReached);
    }
    if task.weekly_cap_reached() {
        return Err(Ineligible::WeeklyCapReached);
    }

    for rule_ref in &task.anti_pattern_rules {
        let Some(rule) = resolve_rule(rule_ref, registered_rules) else {
            return Err(Ineligible::UnresolvedRule);
        };
        if rule_blocks(rule, task, now) {
            return Err(Ineligible::BlockedByRule(rule.kind()));
        }
    }

    if let Some(required) = task.required_capability() {
        match agent_capabilities {
            None => return Err(Ineligible::UnknownAgent),
            Some(capabilities) if !capabilities.contains(&required) => {
                return Err(Ineligible::MissingCapability)
            }
            Some(_) => {}
        }
    }

    Ok(())
}
