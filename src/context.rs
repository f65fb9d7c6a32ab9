use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::engine::{CommandDispatcher, Dispatcher, Orchestrator};
use crate::error::Result;
use crate::registry::AgentRegistry;
use crate::scheduler::FleetScheduler;
use crate::storage::JsonFileStore;
use crate::types::{Agent, ScheduleTask};

/// The registry and scheduler opened against the JSON files in `data_dir`.
pub struct FleetContext {
    pub config: Config,
    pub registry: Arc<AgentRegistry>,
    pub scheduler: Arc<FleetScheduler>,
}

impl FleetContext {
    pub fn open(config: Config) -> Result<Self> {
        let registry = AgentRegistry::load(
            Box::new(JsonFileStore::<Agent>::new(config.agents_path())),
            config.health.clone(),
        )?;
        let scheduler = FleetScheduler::load(Box::new(JsonFileStore::<ScheduleTask>::new(
            config.schedule_path(),
        )))?;

        log::debug!(
            "Opened fleet data in {}: {} agents, {} tasks",
            config.data_dir.display(),
            registry.len(),
            scheduler.len()
        );

        Ok(Self {
            config,
            registry: Arc::new(registry),
            scheduler: Arc::new(scheduler),
        })
    }

    pub fn orchestrator(&self) -> Orchestrator {
        let dispatcher: Arc<dyn Dispatcher> =
            Arc::new(CommandDispatcher::new(self.config.commands.clone()));
        self.orchestrator_with(dispatcher)
    }

    pub fn orchestrator_with(&self, dispatcher: Arc<dyn Dispatcher>) -> Orchestrator {
        Orchestrator::new(
            self.registry.clone(),
            self.scheduler.clone(),
            dispatcher,
            Duration::from_secs(self.config.poll_interval_secs.max(1)),
        )
    }
}
