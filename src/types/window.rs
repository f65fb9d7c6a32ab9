use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// A UTC time-of-day range, optionally restricted to some weekdays.
///
/// `end < start` wraps past midnight and `start == end` covers the whole day.
/// An empty `days` list means every day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
    #[serde(default)]
    pub days: Vec<Weekday>,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            start,
            end,
            days: Vec::new(),
        }
    }

    pub fn full_day() -> Self {
        Self::new(NaiveTime::MIN, NaiveTime::MIN)
    }

    pub fn on_days(mut self, days: Vec<Weekday>) -> Self {
        self.days = days;
        self
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        if !self.days.is_empty() && !self.days.contains(&at.weekday()) {
            return false;
        }

        let time = at.time();
        if self.start == self.end {
            true
        } else if self.start < self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleWindow {
    #[serde(flatten)]
    pub range: TimeRange,
    #[serde(default = "default_multiplier")]
    pub priority_multiplier: f64,
}

fn default_multiplier() -> f64 {
    1.0
}

impl ScheduleWindow {
    pub fn new(range: TimeRange, priority_multiplier: f64) -> Self {
        Self {
            range,
            priority_multiplier,
        }
    }

    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        self.range.contains(at)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AntiPatternRule {
    /// Never dispatch while the window covers the current time.
    IdleBlock { window: TimeRange },
    /// Hold the task back for a while after it last failed.
    FailureCooldown { cooldown_secs: i64 },
    MaxRunsPerDay { max: u32 },
}

impl AntiPatternRule {
    pub fn kind(&self) -> &'static str {
        match self {
            AntiPatternRule::IdleBlock { .. } => "idle_block",
            AntiPatternRule::FailureCooldown { .. } => "failure_cooldown",
            AntiPatternRule::MaxRunsPerDay { .. } => "max_runs_per_day",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        // 2024-05-06 is a Monday
        Utc.with_ymd_and_hms(2024, 5, 6, hour, minute, 0).unwrap()
    }

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    #[test]
    fn test_plain_range() {
        let range = TimeRange::new(hm(8, 0), hm(12, 0));
        assert!(range.contains(at(8, 0)));
        assert!(range.contains(at(11, 59)));
        assert!(!range.contains(at(12, 0)));
        assert!(!range.contains(at(7, 59)));
    }

    #[test]
    fn test_range_wrapping_midnight() {
        let range = TimeRange::new(hm(22, 0), hm(4, 0));
        assert!(range.contains(at(23, 30)));
        assert!(range.contains(at(1, 0)));
        assert!(!range.contains(at(12, 0)));
    }

    #[test]
    fn test_full_day_range() {
        let range = TimeRange::full_day();
        assert!(range.contains(at(0, 0)));
        assert!(range.contains(at(23, 59)));
    }

    #[test]
    fn test_weekday_filter() {
        let range = TimeRange::full_day().on_days(vec![Weekday::Sat, Weekday::Sun]);
        assert!(!range.contains(at(10, 0)));

        let monday_only = TimeRange::full_day().on_days(vec![Weekday::Mon]);
        assert!(monday_only.contains(at(10, 0)));
    }

    #[test]
    fn test_rule_deserializes_from_yaml() {
        let yaml = r#"
type: idle_block
window:
  start: "02:00:00"
  end: "06:00:00"
  days: [Sat]
"#;
        let rule: AntiPatternRule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.kind(), "idle_block");

        let window: ScheduleWindow =
            serde_yaml::from_str("start: \"18:00:00\"\nend: \"23:00:00\"\n").unwrap();
        assert_eq!(window.priority_multiplier, 1.0);
        assert!(window.range.days.is_empty());
    }
}
