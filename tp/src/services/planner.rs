//! Planner backed by a plan file on disk

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::error::PlanError;
use super::traits::{PlanAdjustment, Planner};
use crate::domain::{Feedback, Plan, PlanStep};

/// Parse a plan from YAML or JSON text, chosen by file extension
pub fn parse_plan(path: &Path, text: &str) -> Result<Plan, PlanError> {
    let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
    let plan: Plan = if is_json {
        serde_json::from_str(text).map_err(|e| PlanError::Parse(e.to_string()))?
    } else {
        serde_yaml::from_str(text).map_err(|e| PlanError::Parse(e.to_string()))?
    };
    Ok(plan.normalized())
}

/// Read and parse a plan file
pub fn load_plan(path: &Path) -> Result<Plan, PlanError> {
    debug!(path = %path.display(), "load_plan: called");
    let text = std::fs::read_to_string(path).map_err(|source| PlanError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_plan(path, &text)
}

/// Serves a pre-written plan and applies feedback to it mechanically
///
/// Feedback naming a planned file marks that file for regeneration; any
/// other feedback is recorded as a new plan step.
#[derive(Debug, Clone)]
pub struct PlanFilePlanner {
    path: PathBuf,
}

impl PlanFilePlanner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Planner for PlanFilePlanner {
    async fn create_plan(&self, description: &str) -> Result<Plan, PlanError> {
        debug!(path = %self.path.display(), description_len = description.len(), "PlanFilePlanner::create_plan: called");
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| PlanError::Read {
                path: self.path.display().to_string(),
                source,
            })?;
        let plan = parse_plan(&self.path, &text)?;
        if plan.files.is_empty() {
            return Err(PlanError::Empty);
        }
        info!(files = plan.files.len(), path = %self.path.display(), "Loaded plan");
        Ok(plan)
    }

    async fn adjust_plan(&self, mut plan: Plan, feedback: &Feedback) -> Result<PlanAdjustment, PlanError> {
        debug!(feedback_id = %feedback.id, target = ?feedback.target_file, "PlanFilePlanner::adjust_plan: called");
        if let Some(target) = &feedback.target_file
            && plan.mark_needs_update(target)
        {
            debug!(%target, "PlanFilePlanner::adjust_plan: marked for regeneration");
            return Ok(PlanAdjustment {
                plan,
                requires_recoding: true,
            });
        }

        plan.steps
            .push(PlanStep::new(format!("{}: {}", feedback.kind, feedback.content.trim())));
        Ok(PlanAdjustment {
            plan,
            requires_recoding: false,
        })
    }
}
