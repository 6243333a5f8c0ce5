//! Feedback items and the per-task feedback queue
//!
//! The queue is an append-only log with a monotonic read cursor
//! (`last_processed_index`). Submitters append; only the task's pipeline
//! consumes, and each item is consumed at most once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::id::feedback_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackPriority {
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackUrgency {
    #[default]
    Normal,
    Critical,
}

/// What the feedback is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    #[default]
    General,
    Plan,
    Code,
    Feature,
    Fix,
}

impl std::fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::General => write!(f, "general"),
            Self::Plan => write!(f, "plan"),
            Self::Code => write!(f, "code"),
            Self::Feature => write!(f, "feature"),
            Self::Fix => write!(f, "fix"),
        }
    }
}

impl std::str::FromStr for FeedbackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "general" => Ok(Self::General),
            "plan" => Ok(Self::Plan),
            "code" => Ok(Self::Code),
            "feature" => Ok(Self::Feature),
            "fix" => Ok(Self::Fix),
            _ => Err(format!("Unknown feedback kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackStatus {
    #[default]
    Pending,
    Processing,
    Applied,
    Rejected,
    Completed,
}

impl FeedbackStatus {
    /// Resolved items are never handed to a collaborator again
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Applied | Self::Rejected | Self::Completed)
    }
}

/// Submission options from the caller
#[derive(Debug, Clone, Default)]
pub struct FeedbackOptions {
    pub urgent: bool,
    pub target_file: Option<String>,
    pub kind: Option<FeedbackKind>,
}

impl FeedbackOptions {
    pub fn urgent() -> Self {
        Self {
            urgent: true,
            ..Default::default()
        }
    }

    pub fn with_target_file(mut self, path: impl Into<String>) -> Self {
        self.target_file = Some(path.into());
        self
    }

    pub fn with_kind(mut self, kind: FeedbackKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// One piece of user feedback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: String,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub priority: FeedbackPriority,
    pub urgency: FeedbackUrgency,
    #[serde(rename = "type")]
    pub kind: FeedbackKind,
    pub target_file: Option<String>,
    pub status: FeedbackStatus,
}

impl Feedback {
    /// Classify a submission into a feedback item
    ///
    /// Urgent submissions are high priority and critical. An explicit kind wins;
    /// otherwise a target file makes it `Code`, else `General`.
    pub fn new(task_id: impl Into<String>, content: impl Into<String>, options: FeedbackOptions) -> Self {
        let kind = match (options.kind, &options.target_file) {
            (Some(kind), _) => kind,
            (None, Some(_)) => FeedbackKind::Code,
            (None, None) => FeedbackKind::General,
        };
        let (priority, urgency) = if options.urgent {
            (FeedbackPriority::High, FeedbackUrgency::Critical)
        } else {
            (FeedbackPriority::Normal, FeedbackUrgency::Normal)
        };

        Self {
            id: feedback_id(),
            task_id: task_id.into(),
            timestamp: Utc::now(),
            content: content.into(),
            priority,
            urgency,
            kind,
            target_file: options.target_file,
            status: FeedbackStatus::Pending,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.urgency == FeedbackUrgency::Critical
    }
}

/// Append-only feedback log with a monotonic consumption cursor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackQueue {
    feedbacks: Vec<Feedback>,
    /// Index of the last consumed item; `None` until the first drain
    last_processed_index: Option<usize>,
}

impl FeedbackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item, returning its index
    pub fn push(&mut self, feedback: Feedback) -> usize {
        self.feedbacks.push(feedback);
        self.feedbacks.len() - 1
    }

    pub fn len(&self) -> usize {
        self.feedbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feedbacks.is_empty()
    }

    pub fn items(&self) -> &[Feedback] {
        &self.feedbacks
    }

    pub fn last_processed_index(&self) -> Option<usize> {
        self.last_processed_index
    }

    /// Index of the first item not yet passed by the cursor
    fn unconsumed_start(&self) -> usize {
        self.last_processed_index.map_or(0, |i| i + 1)
    }

    /// Number of items the cursor has not yet passed
    pub fn unconsumed_len(&self) -> usize {
        self.feedbacks.len() - self.unconsumed_start()
    }

    /// Consume everything past the cursor
    ///
    /// Returns the items still `Pending` (now marked `Processing`) and moves
    /// the cursor to the last index. Items already resolved by critical
    /// handling are passed over without being returned.
    pub fn take_pending(&mut self) -> Vec<Feedback> {
        let start = self.unconsumed_start();
        if start >= self.feedbacks.len() {
            debug!(start, len = self.feedbacks.len(), "take_pending: nothing new");
            return Vec::new();
        }

        let mut taken = Vec::new();
        for item in &mut self.feedbacks[start..] {
            if item.status == FeedbackStatus::Pending {
                item.status = FeedbackStatus::Processing;
                taken.push(item.clone());
            }
        }
        self.advance_to(self.feedbacks.len() - 1);
        debug!(taken = taken.len(), cursor = ?self.last_processed_index, "take_pending: drained");
        taken
    }

    /// Claim critical items past the cursor without moving it
    pub fn take_critical(&mut self) -> Vec<Feedback> {
        let start = self.unconsumed_start();
        let mut taken = Vec::new();
        for item in self.feedbacks.iter_mut().skip(start) {
            if item.is_critical() && item.status == FeedbackStatus::Pending {
                item.status = FeedbackStatus::Processing;
                taken.push(item.clone());
            }
        }
        debug!(taken = taken.len(), "take_critical: claimed");
        taken
    }

    /// Most recently submitted critical item, consumed or not
    pub fn latest_critical(&self) -> Option<&Feedback> {
        self.feedbacks.iter().rev().find(|f| f.is_critical())
    }

    /// Set the final status of an item; returns false if the ID is unknown
    pub fn resolve(&mut self, feedback_id: &str, status: FeedbackStatus) -> bool {
        match self.feedbacks.iter_mut().find(|f| f.id == feedback_id) {
            Some(item) => {
                item.status = status;
                true
            }
            None => false,
        }
    }

    /// Move the cursor forward; never backwards and never past the end
    fn advance_to(&mut self, index: usize) {
        let index = index.min(self.feedbacks.len().saturating_sub(1));
        match self.last_processed_index {
            Some(current) if current >= index => {}
            _ => self.last_processed_index = Some(index),
        }
    }
}
