//! Task domain type
//!
//! A task is one orchestrated generation job. All mutation goes through the
//! methods here, and those are only ever called by the registry actor.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::feedback::{Feedback, FeedbackQueue};
use super::phase::Phase;
use super::plan::Plan;

/// Coarse task status seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Planning,
    Coding,
    Testing,
    Debugging,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses are sticky
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Planning => write!(f, "planning"),
            Self::Coding => write!(f, "coding"),
            Self::Testing => write!(f, "testing"),
            Self::Debugging => write!(f, "debugging"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Progress within the current phase and overall
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Progress {
    /// Phase last reported, `None` before the pipeline starts
    pub phase: Option<Phase>,

    /// Fraction of the current phase, in [0, 1]
    pub phase_fraction: f64,

    /// Fraction of the whole pipeline, in [0, 1]
    pub overall: f64,

    pub message: String,
}

/// One recorded error; the newest entry is what the repair loop targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    #[serde(default)]
    pub stack_trace: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
}

impl ErrorInfo {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            stack_trace: None,
            file_path: None,
            timestamp: Utc::now(),
            attempts: 0,
        }
    }

    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

/// Full mutable state of one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub progress: Progress,

    /// Directory the deliverable is generated into
    pub workdir: PathBuf,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,

    pub errors: Vec<ErrorInfo>,
    pub feedback_queue: FeedbackQueue,
    pub has_critical_feedback: bool,
    pub requires_recoding: bool,

    /// Set once the planning phase has produced a plan
    pub plan: Option<Plan>,

    pub artifact_path: Option<PathBuf>,
    pub duration_ms: Option<u64>,
}

impl Task {
    /// Create a task that is entering planning with zero progress
    pub fn new(id: impl Into<String>, description: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            description: description.into(),
            status: TaskStatus::Planning,
            progress: Progress {
                message: "queued".to_string(),
                ..Default::default()
            },
            workdir: workdir.into(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancelled_at: None,
            cancelled_by: None,
            errors: Vec::new(),
            feedback_queue: FeedbackQueue::new(),
            has_critical_feedback: false,
            requires_recoding: false,
            plan: None,
            artifact_path: None,
            duration_ms: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Record phase progress; ignored once terminal
    pub fn update_progress(&mut self, phase: Phase, fraction: f64, message: impl Into<String>) -> bool {
        if self.is_terminal() {
            debug!(task_id = %self.id, status = %self.status, "update_progress: terminal, ignoring");
            return false;
        }
        let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
        if let Some(status) = phase.task_status() {
            self.status = status;
        }
        self.progress = Progress {
            phase: Some(phase),
            phase_fraction: fraction,
            overall: phase.overall(fraction),
            message: message.into(),
        };
        self.touch();
        true
    }

    pub fn complete(&mut self, message: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.status = TaskStatus::Completed;
        self.progress.phase_fraction = 1.0;
        self.progress.overall = 1.0;
        self.progress.message = message.into();
        self.completed_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Mark failed; the reason becomes the progress message, not an error entry
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        let now = Utc::now();
        self.status = TaskStatus::Failed;
        self.progress.message = reason.into();
        self.completed_at = Some(now);
        self.updated_at = now;
        true
    }

    pub fn cancel(&mut self, actor_id: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        let now = Utc::now();
        let actor_id = actor_id.into();
        self.status = TaskStatus::Cancelled;
        self.progress.message = format!("cancelled by {}", actor_id);
        self.cancelled_by = Some(actor_id);
        self.cancelled_at = Some(now);
        self.updated_at = now;
        true
    }

    /// Append feedback; critical items raise the flag in the same step
    pub fn submit_feedback(&mut self, feedback: Feedback) -> bool {
        if self.is_terminal() {
            return false;
        }
        if feedback.is_critical() {
            self.has_critical_feedback = true;
        }
        self.feedback_queue.push(feedback);
        self.touch();
        true
    }

    pub fn push_error(&mut self, error: ErrorInfo) {
        self.errors.push(error);
        self.touch();
    }

    /// Most recent error, the repair target
    pub fn latest_error(&self) -> Option<&ErrorInfo> {
        self.errors.last()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id.clone(),
            description: self.description.clone(),
            status: self.status,
            progress: self.progress.clone(),
            workdir: self.workdir.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            cancelled_at: self.cancelled_at,
            errors: self.errors.clone(),
            feedback: self.feedback_queue.items().to_vec(),
            last_processed_index: self.feedback_queue.last_processed_index(),
            has_critical_feedback: self.has_critical_feedback,
            requires_recoding: self.requires_recoding,
            plan: self.plan.clone(),
            artifact_path: self.artifact_path.clone(),
            duration_ms: self.duration_ms,
        }
    }
}

/// Read-only copy of a task handed to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub progress: Progress,
    pub workdir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub errors: Vec<ErrorInfo>,
    pub feedback: Vec<Feedback>,
    pub last_processed_index: Option<usize>,
    pub has_critical_feedback: bool,
    pub requires_recoding: bool,
    pub plan: Option<Plan>,
    pub artifact_path: Option<PathBuf>,
    pub duration_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::feedback::FeedbackOptions;

    fn task() -> Task {
        Task::new("t-1", "build it", "/tmp/t-1")
    }

    #[test]
    fn test_new_task_is_planning_with_zero_progress() {
        let t = task();
        assert_eq!(t.status, TaskStatus::Planning);
        assert_eq!(t.progress.overall, 0.0);
        assert!(t.feedback_queue.is_empty());
    }

    #[test]
    fn test_update_progress_maps_phase() {
        let mut t = task();
        assert!(t.update_progress(Phase::Coding, 0.5, "half"));
        assert_eq!(t.status, TaskStatus::Coding);
        assert!((t.progress.overall - 0.35).abs() < 1e-9);

    }

    #[test]
    fn test_finalizing_keeps_previous_status() {
        let mut t = task();
        assert!(t.update_progress(Phase::Debugging, 1.0, "repaired"));
        assert!(t.update_progress(Phase::Finalizing, 0.0, "packing"));
        assert_eq!(t.status, TaskStatus::Debugging);
        assert_eq!(t.progress.phase, Some(Phase::Finalizing));
        assert!((t.progress.overall - 0.9).abs() < 1e-9);

        let mut t = task();
        assert!(t.update_progress(Phase::Testing, 1.0, "passed"));
        assert!(t.update_progress(Phase::Finalizing, 0.5, "packing"));
        assert_eq!(t.status, TaskStatus::Testing);
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        let mut t = task();
        assert!(t.complete("done"));
        assert_eq!(t.progress.overall, 1.0);
        assert!(t.completed_at.is_some());

        let before = t.clone();
        assert!(!t.cancel("alice"));
        assert!(!t.fail("late"));
        assert!(!t.update_progress(Phase::Coding, 0.1, "again"));
        assert!(!t.submit_feedback(Feedback::new("t-1", "x", FeedbackOptions::default())));
        assert_eq!(t.status, before.status);
        assert_eq!(t.progress, before.progress);
        assert!(t.cancelled_at.is_none());
        assert!(t.feedback_queue.is_empty());
    }

    #[test]
    fn test_cancel_stamps_end_time() {
        let mut t = task();
        assert!(t.cancel("bob"));
        assert_eq!(t.status, TaskStatus::Cancelled);
        assert!(t.cancelled_at.is_some());
        assert_eq!(t.cancelled_by.as_deref(), Some("bob"));
    }

    #[test]
    fn test_fail_does_not_append_error() {
        let mut t = task();
        assert!(t.fail("archive broke"));
        assert_eq!(t.status, TaskStatus::Failed);
        assert!(t.errors.is_empty());
        assert_eq!(t.progress.message, "archive broke");
        assert!(t.completed_at.is_some());
    }

    #[test]
    fn test_urgent_feedback_sets_flag() {
        let mut t = task();
        assert!(t.submit_feedback(Feedback::new("t-1", "normal", FeedbackOptions::default())));
        assert!(!t.has_critical_feedback);
        assert!(t.submit_feedback(Feedback::new("t-1", "now", FeedbackOptions::urgent())));
        assert!(t.has_critical_feedback);
        assert_eq!(t.feedback_queue.len(), 2);
    }

    #[test]
    fn test_latest_error() {
        let mut t = task();
        assert!(t.latest_error().is_none());
        t.push_error(ErrorInfo::new("a", "first"));
        t.push_error(ErrorInfo::new("b", "second").with_file("x.ts"));
        let latest = t.latest_error().unwrap();
        assert_eq!(latest.error_type, "b");
        assert_eq!(latest.file_path.as_deref(), Some("x.ts"));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(TaskStatus::Debugging.to_string(), "debugging");
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }
}
