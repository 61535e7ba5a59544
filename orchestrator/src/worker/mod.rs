pub mod executor;
pub mod summary;

pub use executor::{plan_actions, ExecutionOptions, Executor, PlannedAction};
pub use summary::{ActionCounts, FailureRecord, RunSummary};
