pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::{CollectionOrchestrator, CollectorSettings};
pub use scheduler::{Scheduler, SchedulerHandle};
