//! Pipeline phases and their mapping to task status
//!
//! `Phase` is the fine-grained stage the engine is in; `TaskStatus` is what
//! callers see. `Phase::task_status` is the only place the two are related.

use serde::{Deserialize, Serialize};

use super::task::TaskStatus;

/// One stage of the pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Coding,
    Testing,
    Debugging,
    Finalizing,
}

impl Phase {
    /// All phases in pipeline order
    pub const ALL: [Phase; 5] = [
        Phase::Planning,
        Phase::Coding,
        Phase::Testing,
        Phase::Debugging,
        Phase::Finalizing,
    ];

    /// Coarse status reported while this phase runs
    ///
    /// Finalizing has no status of its own (`None`): the task keeps whatever
    /// status the last verification phase left and the progress message names
    /// the phase.
    pub fn task_status(self) -> Option<TaskStatus> {
        match self {
            Phase::Planning => Some(TaskStatus::Planning),
            Phase::Coding => Some(TaskStatus::Coding),
            Phase::Testing => Some(TaskStatus::Testing),
            Phase::Debugging => Some(TaskStatus::Debugging),
            Phase::Finalizing => None,
        }
    }

    /// Overall-progress band `[start, end)` occupied by this phase
    pub fn band(self) -> (f64, f64) {
        match self {
            Phase::Planning => (0.0, 0.1),
            Phase::Coding => (0.1, 0.6),
            Phase::Testing => (0.6, 0.75),
            Phase::Debugging => (0.75, 0.9),
            Phase::Finalizing => (0.9, 1.0),
        }
    }

    /// Map a per-phase fraction to overall progress
    pub fn overall(self, fraction: f64) -> f64 {
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        let (start, end) = self.band();
        start + (end - start) * fraction
    }

    /// Human-readable label used in checkpoints and progress text
    pub fn label(self) -> &'static str {
        match self {
            Phase::Planning => "planning",
            Phase::Coding => "coding",
            Phase::Testing => "testing",
            Phase::Debugging => "debugging",
            Phase::Finalizing => "finalizing",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}
