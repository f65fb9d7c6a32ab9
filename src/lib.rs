pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod plan;
pub mod registry;
pub mod scheduler;
pub mod storage;
pub mod types;

pub use config::Config;
pub use context::FleetContext;
pub use error::{FleetError, Result};
pub use plan::FleetPlan;
pub use registry::{AgentDirectory, AgentRegistry};
pub use scheduler::FleetScheduler;
pub use types::*;
