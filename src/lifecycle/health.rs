use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Agent, AgentHealth, ErrorEvent};

const MAX_ERROR_HISTORY: usize = 50;

/// Thresholds used to grade an agent's health.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthPolicy {
    pub stale_after_secs: i64,
    pub error_window_secs: i64,
    pub warning_errors: usize,
    pub critical_errors: usize,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            stale_after_secs: 30,
            error_window_secs: 300,
            warning_errors: 5,
            critical_errors: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthChangeReason {
    StaleHeartbeat,
    ErrorBurst,
    ElevatedErrors,
    Nominal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthAssessment {
    pub health: AgentHealth,
    pub reason: HealthChangeReason,
    pub recent_errors: usize,
    pub heartbeat_age_secs: i64,
}

impl HealthAssessment {
    pub fn is_stale(&self) -> bool {
        self.reason == HealthChangeReason::StaleHeartbeat
    }
}

impl HealthPolicy {
    pub fn record_error(&self, agent: &mut Agent, message: impl Into<String>, at: DateTime<Utc>) {
        let message = message.into();
        agent.error_count += 1;
        agent.last_error = Some(message.clone());
        agent.error_history.push_back(ErrorEvent {
            timestamp: at,
            message,
        });

        if agent.error_history.len() > MAX_ERROR_HISTORY {
            agent.error_history.pop_front();
        }
    }

    pub fn recent_errors(&self, agent: &Agent, now: DateTime<Utc>) -> usize {
        // A window too wide to represent counts the whole history.
        let cutoff = Duration::try_seconds(self.error_window_secs)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        agent
            .error_history
            .iter()
            .filter(|e| e.timestamp > cutoff)
            .count()
    }

    /// A stale heartbeat is critical no matter how clean the error history is.
    pub fn evaluate(&self, agent: &Agent, now: DateTime<Utc>) -> HealthAssessment {
        let heartbeat_age_secs = agent.heartbeat_age_secs(now);
        let recent_errors = self.recent_errors(agent, now);

        let (health, reason) = if heartbeat_age_secs > self.stale_after_secs {
            (AgentHealth::Critical, HealthChangeReason::StaleHeartbeat)
        } else if recent_errors >= self.critical_errors {
            (AgentHealth::Critical, HealthChangeReason::ErrorBurst)
        } else if recent_errors >= self.warning_errors {
            (AgentHealth::Warning, HealthChangeReason::ElevatedErrors)
        } else {
            (AgentHealth::Healthy, HealthChangeReason::Nominal)
        };

        HealthAssessment {
            health,
            reason,
            recent_errors,
            heartbeat_age_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CapabilitySet;

    fn create_test_agent() -> Agent {
        Agent::new("alpha", "rig-01", "w1", CapabilitySet::new(), None)
    }

    #[test]
    fn test_fresh_agent_is_healthy() {
        let policy = HealthPolicy::default();
        let agent = create_test_agent();

        let assessment = policy.evaluate(&agent, Utc::now());
        assert_eq!(assessment.health, AgentHealth::Healthy);
        assert_eq!(assessment.reason, HealthChangeReason::Nominal);
    }

    #[test]
    fn test_error_thresholds() {
        let policy = HealthPolicy::default();
        let mut agent = create_test_agent();
        let now = Utc::now();

        for _ in 0..5 {
            policy.record_error(&mut agent, "stuck on loading screen", now);
        }
        assert_eq!(policy.evaluate(&agent, now).health, AgentHealth::Warning);

        for _ in 0..5 {
            policy.record_error(&mut agent, "stuck on loading screen", now);
        }
        let assessment = policy.evaluate(&agent, now);
        assert_eq!(assessment.health, AgentHealth::Critical);
        assert_eq!(assessment.reason, HealthChangeReason::ErrorBurst);
        assert_eq!(agent.error_count, 10);
    }

    #[test]
    fn test_old_errors_fall_out_of_window() {
        let policy = HealthPolicy::default();
        let mut agent = create_test_agent();
        let now = Utc::now();

        for _ in 0..12 {
            policy.record_error(&mut agent, "old", now - Duration::minutes(10));
        }

        assert_eq!(policy.recent_errors(&agent, now), 0);
        assert_eq!(policy.evaluate(&agent, now).health, AgentHealth::Healthy);
        assert_eq!(agent.error_count, 12);
    }

    #[test]
    fn test_oversized_error_window() {
        let policy = HealthPolicy {
            error_window_secs: i64::MAX,
            ..HealthPolicy::default()
        };
        let mut agent = create_test_agent();
        let now = Utc::now();
        policy.record_error(&mut agent, "ancient", now - Duration::days(400));

        assert_eq!(policy.recent_errors(&agent, now), 1);
    }

    #[test]
    fn test_stale_heartbeat_is_critical() {
        let policy = HealthPolicy::default();
        let mut agent = create_test_agent();
        let now = Utc::now();
        agent.last_heartbeat = now - Duration::seconds(31);

        let assessment = policy.evaluate(&agent, now);
        assert_eq!(assessment.health, AgentHealth::Critical);
        assert!(assessment.is_stale());
    }

    #[test]
    fn test_history_is_bounded() {
        let policy = HealthPolicy::default();
        let mut agent = create_test_agent();

        for i in 0..60 {
            policy.record_error(&mut agent, format!("error {}", i), Utc::now());
        }

        assert_eq!(agent.error_history.len(), MAX_ERROR_HISTORY);
        assert_eq!(agent.error_count, 60);
        assert_eq!(agent.last_error.as_deref(), Some("error 59"));
    }
}
