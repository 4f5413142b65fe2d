pub mod config;
mod orchestrator;
mod types;

pub use orchestrator::{run_stacking, StackingOutput, StackingReport};
pub(crate) use types::PhaseProgress;
pub use types::{CancelFlag, NoOpReporter, PipelinePhase, ProgressReporter};
