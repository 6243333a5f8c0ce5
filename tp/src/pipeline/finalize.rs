//! Packaging the finished working directory

use std::path::PathBuf;

use tracing::info;

use crate::domain::Phase;

use super::engine::PipelineEngine;
use super::error::PipelineError;

impl PipelineEngine {
    /// Archive the workdir and record the artifact; archive failure is fatal
    pub(super) async fn finalize(&self) -> Result<PathBuf, PipelineError> {
        self.registry
            .update_progress(&self.task_id, Phase::Finalizing, 0.0, "packaging deliverable")
            .await?;

        let artifact = self
            .collaborators
            .archiver
            .archive(&self.task_id, &self.workdir, &self.settings.archive_excludes)
            .await?;

        let duration_ms = self.started.elapsed().as_millis() as u64;
        self.registry
            .record_artifact(&self.task_id, artifact.clone(), duration_ms)
            .await?;
        info!(task_id = %self.task_id, artifact = %artifact.display(), duration_ms, "Deliverable packaged");
        Ok(artifact)
    }
}
