pub mod catalog;
pub mod context;
pub mod engine;
pub mod scheduler;
pub mod steps;

pub use catalog::{catalog_for, step_defs_for, CatalogEntry};
pub use context::{parse_owner_repo, safe_version, StepContext, StepFuture, StepHandler, StepOutcome};
pub use engine::{Engine, EngineDeps, EngineError};
pub use scheduler::Scheduler;
