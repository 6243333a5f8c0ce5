//! Task registry messages
//!
//! Commands and responses for the actor pattern.

use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{ErrorInfo, Feedback, FeedbackStatus, Phase, Plan, TaskSnapshot};

/// Errors from registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task already exists: {0}")]
    AlreadyExists(String),

    #[error("Channel error")]
    ChannelError,
}

/// Response from registry operations
pub type RegistryResponse<T> = Result<T, RegistryError>;

/// A state change that was applied, with the task as it now stands
#[derive(Debug, Clone)]
pub struct Transition {
    pub snapshot: TaskSnapshot,
    pub status_changed: bool,
}

/// Commands sent to the TaskRegistry actor
#[derive(Debug)]
pub enum RegistryCommand {
    // Lifecycle
    Create {
        id: String,
        description: String,
        workdir: PathBuf,
        reply: oneshot::Sender<RegistryResponse<TaskSnapshot>>,
    },
    Get {
        id: String,
        reply: oneshot::Sender<RegistryResponse<Option<TaskSnapshot>>>,
    },
    List {
        reply: oneshot::Sender<RegistryResponse<Vec<TaskSnapshot>>>,
    },
    UpdateProgress {
        id: String,
        phase: Phase,
        fraction: f64,
        message: String,
        reply: oneshot::Sender<RegistryResponse<Option<Transition>>>,
    },
    Complete {
        id: String,
        message: String,
        reply: oneshot::Sender<RegistryResponse<Option<Transition>>>,
    },
    Fail {
        id: String,
        reason: String,
        reply: oneshot::Sender<RegistryResponse<Option<Transition>>>,
    },
    Cancel {
        id: String,
        actor_id: String,
        reply: oneshot::Sender<RegistryResponse<Option<Transition>>>,
    },

    // Pipeline bookkeeping
    SetDescription {
        id: String,
        description: String,
        reply: oneshot::Sender<RegistryResponse<()>>,
    },
    SetPlan {
        id: String,
        plan: Plan,
        reply: oneshot::Sender<RegistryResponse<()>>,
    },
    PushError {
        id: String,
        error: ErrorInfo,
        reply: oneshot::Sender<RegistryResponse<()>>,
    },
    SetRequiresRecoding {
        id: String,
        value: bool,
        reply: oneshot::Sender<RegistryResponse<()>>,
    },
    RecordArtifact {
        id: String,
        path: PathBuf,
        duration_ms: u64,
        reply: oneshot::Sender<RegistryResponse<()>>,
    },

    // Feedback
    SubmitFeedback {
        id: String,
        feedback: Feedback,
        reply: oneshot::Sender<RegistryResponse<bool>>,
    },
    TakePendingFeedback {
        id: String,
        reply: oneshot::Sender<RegistryResponse<Vec<Feedback>>>,
    },
    TakeCriticalFeedback {
        id: String,
        reply: oneshot::Sender<RegistryResponse<Vec<Feedback>>>,
    },
    ResolveFeedback {
        id: String,
        feedback_id: String,
        status: FeedbackStatus,
        reply: oneshot::Sender<RegistryResponse<bool>>,
    },

    // Shutdown
    Shutdown,
}
