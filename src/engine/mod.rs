pub mod dispatch;
pub mod orchestrator;

pub use dispatch::{CommandDispatcher, DispatchOutcome, Dispatcher};
pub use orchestrator::{Dispatched, Orchestrator, TaskRun, TickReport};
