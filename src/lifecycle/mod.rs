pub mod health;
pub mod task_status;

pub use health::{HealthAssessment, HealthChangeReason, HealthPolicy};
pub use task_status::{StatusUpdate, TaskLifecycle, Transition};
