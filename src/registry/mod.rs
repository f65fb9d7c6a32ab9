//! The authoritative set of known agents and their live status.
//!
//! Unknown names degrade to `false`/`None` rather than errors; only a
//! duplicate registration or a storage failure is reported as an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{FleetError, Result};
use crate::lifecycle::HealthPolicy;
use crate::storage::{InMemoryStore, RecordStore};
use crate::types::{Agent, AgentHealth, AgentStatus, Capability, CapabilitySet};

/// Read-only view of agent capabilities, consulted by the scheduler.
pub trait AgentDirectory {
    fn capabilities_of(&self, name: &str) -> Option<CapabilitySet>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySummary {
    pub total_agents: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_health: BTreeMap<String, usize>,
    pub by_capability: BTreeMap<String, usize>,
    pub total_errors: u64,
}

pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Agent>>,
    store: Box<dyn RecordStore<Agent>>,
    policy: HealthPolicy,
}

impl AgentRegistry {
    /// Builds a registry from whatever the store already holds.
    pub fn load(store: Box<dyn RecordStore<Agent>>, policy: HealthPolicy) -> Result<Self> {
        let records = store.load()?;
        let mut agents = HashMap::with_capacity(records.len());
        for agent in records {
            if agents.contains_key(&agent.name) {
                log::warn!(
                    "Duplicate agent '{}' in {}, keeping the later record",
                    agent.name,
                    store.describe()
                );
            }
            agents.insert(agent.name.clone(), agent);
        }

        log::info!("Loaded {} agents from {}", agents.len(), store.describe());

        Ok(Self {
            agents: RwLock::new(agents),
            store,
            policy,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            store: Box::new(InMemoryStore::new()),
            policy: HealthPolicy::default(),
        }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Agent>> {
        self.agents.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Agent>> {
        self.agents.write().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, agents: &HashMap<String, Agent>) -> Result<()> {
        let mut records: Vec<Agent> = agents.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        self.store.save(&records)
    }

    pub fn register(
        &self,
        name: &str,
        machine_id: &str,
        window_id: &str,
        capabilities: CapabilitySet,
        config_path: Option<PathBuf>,
    ) -> Result<Agent> {
        let mut agents = self.write();
        if agents.contains_key(name) {
            return Err(FleetError::DuplicateAgent(name.to_string()));
        }

        let agent = Agent::new(name, machine_id, window_id, capabilities, config_path);
        agents.insert(agent.name.clone(), agent.clone());
        self.persist(&agents)?;

        log::info!(
            "Registered agent {} on {} ({}) with {} capabilities",
            agent.name,
            agent.machine_id,
            agent.window_id,
            agent.capabilities.len()
        );
        Ok(agent)
    }

    pub fn unregister(&self, name: &str) -> Result<bool> {
        let mut agents = self.write();
        if agents.remove(name).is_none() {
            log::debug!("Unregister ignored for unknown agent {}", name);
            return Ok(false);
        }

        self.persist(&agents)?;
        log::info!("Unregistered agent {}", name);
        Ok(true)
    }

    pub fn update_heartbeat(
        &self,
        name: &str,
        status: AgentStatus,
        mode: Option<String>,
        metrics: Option<HashMap<String, f64>>,
    ) -> Result<bool> {
        self.update_heartbeat_at(name, status, mode, metrics, Utc::now())
    }

    pub fn update_heartbeat_at(
        &self,
        name: &str,
        status: AgentStatus,
        mode: Option<String>,
        metrics: Option<HashMap<String, f64>>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut agents = self.write();
        let Some(agent) = agents.get_mut(name) else {
            log::debug!("Heartbeat from unknown agent {}", name);
            return Ok(false);
        };

        if agent.status != status {
            log::debug!("Agent {} status {} -> {}", name, agent.status, status);
        }
        agent.status = status;
        agent.current_mode = mode;
        if let Some(metrics) = metrics {
            agent.performance_metrics.extend(metrics);
        }
        agent.last_heartbeat = now;

        self.persist(&agents)?;
        Ok(true)
    }

    pub fn report_error(&self, name: &str, message: &str) -> Result<bool> {
        self.report_error_at(name, message, Utc::now())
    }

    pub fn report_error_at(&self, name: &str, message: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut agents = self.write();
        let Some(agent) = agents.get_mut(name) else {
            log::debug!("Error report for unknown agent {}: {}", name, message);
            return Ok(false);
        };

        self.policy.record_error(agent, message, now);
        log::warn!(
            "Agent {} reported error #{}: {}",
            name,
            agent.error_count,
            message
        );

        self.persist(&agents)?;
        Ok(true)
    }

    /// Operator reset after the underlying problem has been dealt with.
    pub fn clear_errors(&self, name: &str) -> Result<bool> {
        let mut agents = self.write();
        let Some(agent) = agents.get_mut(name) else {
            return Ok(false);
        };

        agent.error_count = 0;
        agent.last_error = None;
        agent.error_history.clear();

        self.persist(&agents)?;
        Ok(true)
    }

    pub fn check_health(&self, name: &str) -> Result<Option<AgentHealth>> {
        self.check_health_at(name, Utc::now())
    }

    /// Grades the agent and stores the result. A stale heartbeat also marks it offline.
    pub fn check_health_at(&self, name: &str, now: DateTime<Utc>) -> Result<Option<AgentHealth>> {
        let mut agents = self.write();
        let Some(agent) = agents.get_mut(name) else {
            return Ok(None);
        };

        let changed = Self::apply_assessment(&self.policy, agent, now);
        let health = agent.health;

        if changed {
            self.persist(&agents)?;
        }
        Ok(Some(health))
    }

    pub fn check_all_health(&self) -> Result<BTreeMap<String, AgentHealth>> {
        self.check_all_health_at(Utc::now())
    }

    pub fn check_all_health_at(&self, now: DateTime<Utc>) -> Result<BTreeMap<String, AgentHealth>> {
        let mut agents = self.write();
        let mut changed = false;
        let mut result = BTreeMap::new();

        for agent in agents.values_mut() {
            changed |= Self::apply_assessment(&self.policy, agent, now);
            result.insert(agent.name.clone(), agent.health);
        }

        if changed {
            self.persist(&agents)?;
        }
        Ok(result)
    }

    fn apply_assessment(policy: &HealthPolicy, agent: &mut Agent, now: DateTime<Utc>) -> bool {
        let assessment = policy.evaluate(agent, now);
        let mut changed = false;

        if agent.health != assessment.health {
            log::info!(
                "Agent {} health {} -> {} ({:?}, {} recent errors, heartbeat {}s old)",
                agent.name,
                agent.health,
                assessment.health,
                assessment.reason,
                assessment.recent_errors,
                assessment.heartbeat_age_secs
            );
            agent.health = assessment.health;
            changed = true;
        }

        if assessment.is_stale() && agent.status != AgentStatus::Offline {
            log::warn!(
                "Agent {} missed heartbeats for {}s, marking offline",
                agent.name,
                assessment.heartbeat_age_secs
            );
            agent.status = AgentStatus::Offline;
            changed = true;
        }

        changed
    }

    pub fn get_agent(&self, name: &str) -> Option<Agent> {
        self.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn list_agents(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.read().values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    pub fn get_agents_by_status(&self, status: AgentStatus) -> Vec<Agent> {
        self.filtered(|a| a.status == status)
    }

    pub fn get_agents_by_capability(&self, capability: Capability) -> Vec<Agent> {
        self.filtered(|a| a.has_capability(capability))
    }

    fn filtered(&self, predicate: impl Fn(&Agent) -> bool) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self
            .read()
            .values()
            .filter(|a| predicate(*a))
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        agents
    }

    pub fn get_registry_summary(&self) -> RegistrySummary {
        let agents = self.read();
        let mut by_status = BTreeMap::new();
        let mut by_health = BTreeMap::new();
        let mut by_capability = BTreeMap::new();
        let mut total_errors = 0u64;

        for agent in agents.values() {
            *by_status.entry(agent.status.to_string()).or_insert(0) += 1;
            *by_health.entry(agent.health.to_string()).or_insert(0) += 1;
            for capability in &agent.capabilities {
                *by_capability.entry(capability.to_string()).or_insert(0) += 1;
            }
            total_errors += u64::from(agent.error_count);
        }

        RegistrySummary {
            total_agents: agents.len(),
            by_status,
            by_health,
            by_capability,
            total_errors,
        }
    }
}

impl AgentDirectory for AgentRegistry {
    fn capabilities_of(&self, name: &str) -> Option<CapabilitySet> {
        self.read().get(name).map(|a| a.capabilities.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn caps(list: &[Capability]) -> CapabilitySet {
        list.iter().copied().collect()
    }

    fn registry_with_store() -> (AgentRegistry, Arc<InMemoryStore<Agent>>) {
        let store = Arc::new(InMemoryStore::new());
        let registry =
            AgentRegistry::load(Box::new(store.clone()), HealthPolicy::default())
                .unwrap();
        (registry, store)
    }

    #[test]
    fn test_register_initial_state() {
        let registry = AgentRegistry::in_memory();
        let agent = registry
            .register("alpha", "rig-01", "w1", caps(&[Capability::Quest]), None)
            .unwrap();

        assert_eq!(agent.status, AgentStatus::Online);
        assert_eq!(agent.health, AgentHealth::Healthy);
        assert_eq!(agent.error_count, 0);
        assert!(registry.contains("alpha"));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = AgentRegistry::in_memory();
        registry
            .register("alpha", "rig-01", "w1", CapabilitySet::new(), None)
            .unwrap();

        let result = registry.register("alpha", "rig-02", "w2", CapabilitySet::new(), None);
        assert!(matches!(result, Err(FleetError::DuplicateAgent(name)) if name == "alpha"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_agent("alpha").unwrap().machine_id, "rig-01");
    }

    #[test]
    fn test_unregister() {
        let registry = AgentRegistry::in_memory();
        registry
            .register("alpha", "rig-01", "w1", CapabilitySet::new(), None)
            .unwrap();

        assert!(registry.unregister("alpha").unwrap());
        assert!(!registry.unregister("alpha").unwrap());
        assert!(registry.get_agent("alpha").is_none());
    }

    #[test]
    fn test_heartbeat_updates_and_persists() {
        let (registry, store) = registry_with_store();
        registry
            .register("alpha", "rig-01", "w1", CapabilitySet::new(), None)
            .unwrap();
        let saves_before = store.save_count();

        let metrics = HashMap::from([("xp_per_hour".to_string(), 4200.0)]);
        let updated = registry
            .update_heartbeat("alpha", AgentStatus::Busy, Some("quest".to_string()), Some(metrics))
            .unwrap();

        assert!(updated);
        assert_eq!(store.save_count(), saves_before + 1);

        let agent = registry.get_agent("alpha").unwrap();
        assert_eq!(agent.status, AgentStatus::Busy);
        assert_eq!(agent.current_mode.as_deref(), Some("quest"));
        assert_eq!(agent.performance_metrics["xp_per_hour"], 4200.0);

        let stored: Vec<Agent> = store.load().unwrap();
        assert_eq!(stored[0].status, AgentStatus::Busy);
    }

    #[test]
    fn test_heartbeat_unknown_agent() {
        let registry = AgentRegistry::in_memory();
        assert!(!registry
            .update_heartbeat("ghost", AgentStatus::Online, None, None)
            .unwrap());
        assert!(!registry.report_error("ghost", "boom").unwrap());
        assert_eq!(registry.check_health("ghost").unwrap(), None);
    }

    #[test]
    fn test_health_transitions_with_errors() {
        let registry = AgentRegistry::in_memory();
        registry
            .register("alpha", "rig-01", "w1", CapabilitySet::new(), None)
            .unwrap();

        assert_eq!(registry.check_health("alpha").unwrap(), Some(AgentHealth::Healthy));

        for _ in 0..5 {
            registry.report_error("alpha", "target lost").unwrap();
        }
        assert_eq!(registry.check_health("alpha").unwrap(), Some(AgentHealth::Warning));

        for _ in 0..5 {
            registry.report_error("alpha", "target lost").unwrap();
        }
        assert_eq!(registry.check_health("alpha").unwrap(), Some(AgentHealth::Critical));
        assert_eq!(registry.get_agent("alpha").unwrap().error_count, 10);

        registry.clear_errors("alpha").unwrap();
        assert_eq!(registry.check_health("alpha").unwrap(), Some(AgentHealth::Healthy));
    }

    #[test]
    fn test_stale_heartbeat_forces_offline() {
        let registry = AgentRegistry::in_memory();
        registry
            .register("alpha", "rig-01", "w1", CapabilitySet::new(), None)
            .unwrap();
        let later = Utc::now() + Duration::seconds(45);

        let health = registry.check_health_at("alpha", later).unwrap();
        assert_eq!(health, Some(AgentHealth::Critical));
        assert_eq!(registry.get_agent("alpha").unwrap().status, AgentStatus::Offline);

        // Heartbeats resuming lets the agent recover.
        registry
            .update_heartbeat_at("alpha", AgentStatus::Online, None, None, later)
            .unwrap();
        assert_eq!(
            registry.check_health_at("alpha", later).unwrap(),
            Some(AgentHealth::Healthy)
        );
        assert_eq!(registry.get_agent("alpha").unwrap().status, AgentStatus::Online);
    }

    #[test]
    fn test_queries() {
        let registry = AgentRegistry::in_memory();
        registry
            .register("alpha", "rig-01", "w1", caps(&[Capability::Quest]), None)
            .unwrap();
        registry
            .register(
                "bravo",
                "rig-01",
                "w2",
                caps(&[Capability::Quest, Capability::Combat]),
                None,
            )
            .unwrap();
        registry
            .update_heartbeat("bravo", AgentStatus::Busy, Some("combat".into()), None)
            .unwrap();

        let questers = registry.get_agents_by_capability(Capability::Quest);
        assert_eq!(questers.len(), 2);
        assert_eq!(registry.get_agents_by_capability(Capability::Combat)[0].name, "bravo");

        let busy = registry.get_agents_by_status(AgentStatus::Busy);
        assert_eq!(busy.len(), 1);
        assert_eq!(busy[0].name, "bravo");

        assert_eq!(
            registry.capabilities_of("alpha"),
            Some(caps(&[Capability::Quest]))
        );
        assert_eq!(registry.capabilities_of("nobody"), None);
    }

    #[test]
    fn test_registry_summary() {
        let registry = AgentRegistry::in_memory();
        registry
            .register("alpha", "rig-01", "w1", caps(&[Capability::Quest]), None)
            .unwrap();
        registry
            .register("bravo", "rig-02", "w1", caps(&[Capability::Crafting]), None)
            .unwrap();
        registry.report_error("bravo", "no resources").unwrap();

        let summary = registry.get_registry_summary();
        assert_eq!(summary.total_agents, 2);
        assert_eq!(summary.by_status["online"], 2);
        assert_eq!(summary.by_health["healthy"], 2);
        assert_eq!(summary.by_capability["crafting"], 1);
        assert_eq!(summary.total_errors, 1);
    }

    #[test]
    fn test_reload_from_store() {
        let store = Arc::new(InMemoryStore::new());
        {
            let registry = AgentRegistry::load(
                Box::new(store.clone()),
                HealthPolicy::default(),
            )
            .unwrap();
            registry
                .register("alpha", "rig-01", "w1", caps(&[Capability::Medic]), None)
                .unwrap();
        }

        let reloaded =
            AgentRegistry::load(Box::new(store), HealthPolicy::default()).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get_agent("alpha").unwrap().has_capability(Capability::Medic));
    }
}
