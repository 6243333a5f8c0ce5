//! Domain types for taskpipe
//!
//! Task, Plan, Feedback and the phase model. These are plain data with
//! local invariants; ownership and concurrency live in `state`.

mod feedback;
mod id;
mod phase;
mod plan;
mod task;

pub use feedback::{
    Feedback, FeedbackKind, FeedbackOptions, FeedbackPriority, FeedbackQueue, FeedbackStatus, FeedbackUrgency,
};
pub use id::{feedback_id, generate_id};
pub use phase::Phase;
pub use plan::{FileInfo, FileStatus, Plan, PlanStep, StepStatus, TechnicalStack};
pub use task::{ErrorInfo, Progress, Task, TaskSnapshot, TaskStatus};
