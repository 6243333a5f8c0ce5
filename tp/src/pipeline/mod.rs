//! Task pipeline
//!
//! The phase state machine, its feedback checkpoints, the bounded repair
//! loop and packaging.

mod checkpoint;
mod engine;
mod error;
mod finalize;
mod repair;

pub use checkpoint::CheckpointSummary;
pub use engine::{Collaborators, PipelineEngine, PipelineSettings, TaskOutcome};
pub use error::{PipelineError, SetupError};
pub use repair::{RepairLoop, RepairOutcome};
