//! taskpipe - feedback-aware task pipeline
//!
//! Drives long-running generation tasks through Planning, Coding, Testing,
//! Debugging and Finalizing while accepting user feedback mid-flight.
//!
//! # Modules
//!
//! - [`domain`] - Task, Plan and Feedback types
//! - [`scheduler`] - dependency ordering for file generation
//! - [`state`] - the TaskRegistry actor
//! - [`services`] - collaborator traits and local implementations
//! - [`pipeline`] - the phase state machine and repair loop
//! - [`manager`] - caller-facing TaskManager
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod config;
pub mod domain;
pub mod manager;
pub mod pipeline;
pub mod scheduler;
pub mod services;
pub mod state;

// Re-export commonly used types
pub use config::Config;
pub use domain::{
    ErrorInfo, Feedback, FeedbackKind, FeedbackOptions, FeedbackQueue, FeedbackStatus, FileInfo, FileStatus, Phase,
    Plan, Progress, Task, TaskSnapshot, TaskStatus,
};
pub use manager::{TaskManager, TaskSpec};
pub use pipeline::{Collaborators, PipelineEngine, PipelineError, PipelineSettings, SetupError, TaskOutcome};
pub use scheduler::DependencyScheduler;
pub use services::{
    Archiver, FileGenerator, Fixer, Notification, Notifier, PlanAdjustment, Planner, TaskContext, TestOutcome, Tester,
};
pub use state::{RegistryError, RegistryEvent, TaskRegistry};
