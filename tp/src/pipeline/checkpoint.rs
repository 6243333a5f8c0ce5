//! Feedback checkpoints, critical preemption and observation windows

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::domain::{Feedback, FeedbackStatus, Phase, Plan};
use crate::state::RegistryEvent;

use super::engine::PipelineEngine;
use super::error::PipelineError;

/// What one checkpoint drain did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointSummary {
    pub applied: usize,
    pub rejected: usize,
    pub requires_recoding: bool,
}

impl PipelineEngine {
    /// Fold feedback that arrived before a plan exists into the description
    pub(super) async fn drain_before_planning(&mut self) -> Result<usize, PipelineError> {
        let items = self.registry.take_pending_feedback(&self.task_id).await?;
        if items.is_empty() {
            return Ok(0);
        }
        info!(task_id = %self.task_id, count = items.len(), "Folding feedback into task description");

        self.description = fold_into_description(&self.description, &items);
        self.registry.set_description(&self.task_id, self.description.clone()).await?;
        for item in &items {
            self.registry
                .resolve_feedback(&self.task_id, &item.id, FeedbackStatus::Applied)
                .await?;
        }
        Ok(items.len())
    }

    /// Drain everything past the cursor and hand it to the planner in order
    pub(super) async fn checkpoint(&mut self, label: &str, plan: &mut Plan) -> Result<CheckpointSummary, PipelineError> {
        debug!(task_id = %self.task_id, %label, "checkpoint: called");
        let items = self.registry.take_pending_feedback(&self.task_id).await?;
        if items.is_empty() {
            return Ok(CheckpointSummary::default());
        }

        let mut summary = CheckpointSummary::default();
        for item in &items {
            let status = match self.collaborators.planner.adjust_plan(plan.clone(), item).await {
                Ok(adjustment) => {
                    *plan = adjustment.plan;
                    summary.requires_recoding |= adjustment.requires_recoding;
                    summary.applied += 1;
                    FeedbackStatus::Applied
                }
                Err(e) => {
                    warn!(task_id = %self.task_id, feedback_id = %item.id, error = %e, "Feedback could not be applied");
                    summary.rejected += 1;
                    FeedbackStatus::Rejected
                }
            };
            self.registry.resolve_feedback(&self.task_id, &item.id, status).await?;
        }

        self.registry.set_plan(&self.task_id, plan.clone()).await?;
        if summary.requires_recoding {
            self.registry.set_requires_recoding(&self.task_id, true).await?;
        }
        info!(
            task_id = %self.task_id,
            %label,
            applied = summary.applied,
            rejected = summary.rejected,
            requires_recoding = summary.requires_recoding,
            "Checkpoint applied feedback"
        );
        Ok(summary)
    }

    /// Run critical handling if the flag is raised; returns whether it ran
    ///
    /// Runs once per raised flag. Urgent items a checkpoint already applied
    /// are handed over again (the latest one) but keep their resolved status.
    pub(super) async fn handle_critical(&mut self, plan: &mut Plan) -> Result<bool, PipelineError> {
        let snapshot = self.registry.get_required(&self.task_id).await?;
        if !snapshot.has_critical_feedback {
            return Ok(false);
        }

        let items = self.registry.take_critical_feedback(&self.task_id).await?;
        if items.is_empty() {
            debug!(task_id = %self.task_id, "handle_critical: flag set but no critical items recorded");
            return Ok(false);
        }
        info!(task_id = %self.task_id, count = items.len(), "Handling critical feedback");

        let status = match self.collaborators.planner.handle_critical(plan.clone(), &items).await {
            Ok(adjustment) => {
                *plan = adjustment.plan;
                self.registry.set_plan(&self.task_id, plan.clone()).await?;
                if adjustment.requires_recoding {
                    self.registry.set_requires_recoding(&self.task_id, true).await?;
                }
                FeedbackStatus::Applied
            }
            Err(e) => {
                warn!(task_id = %self.task_id, error = %e, "Critical feedback could not be applied");
                FeedbackStatus::Rejected
            }
        };
        for item in items.iter().filter(|f| f.status == FeedbackStatus::Processing) {
            self.registry.resolve_feedback(&self.task_id, &item.id, status).await?;
        }
        Ok(true)
    }

    /// Pause so feedback can still arrive; ends early on cancellation
    pub(super) async fn observation_window(&self, phase: Phase, fraction: f64) -> Result<(), PipelineError> {
        let window = self.settings.observation_window;
        if window.is_zero() {
            return Ok(());
        }
        let mut events = self.registry.subscribe_events();
        if self.is_cancelled().await? {
            return Ok(());
        }
        self.registry
            .update_progress(
                &self.task_id,
                phase,
                fraction,
                format!("waiting {}s for feedback", window.as_secs_f64().round()),
            )
            .await?;

        let sleep = tokio::time::sleep(window);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => {
                    debug!(task_id = %self.task_id, %phase, "observation_window: elapsed");
                    return Ok(());
                }
                event = events.recv() => match event {
                    Ok(RegistryEvent::TaskCancelled { id }) if id == self.task_id => {
                        debug!(task_id = %self.task_id, "observation_window: cancelled, ending early");
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(task_id = %self.task_id, skipped, "observation_window: events lagged");
                        if self.is_cancelled().await? {
                            return Ok(());
                        }
                    }
                    Err(RecvError::Closed) => {
                        sleep.as_mut().await;
                        return Ok(());
                    }
                },
            }
        }
    }
}

/// Append feedback text to a task description as extra requirements
pub(super) fn fold_into_description(description: &str, items: &[Feedback]) -> String {
    let mut folded = description.trim_end().to_string();
    folded.push_str("\n\nAdditional requirements:");
    for item in items {
        folded.push_str("\n- ");
        folded.push_str(item.content.trim());
    }
    folded
}
