//! TaskManager - the caller-facing surface
//!
//! Creates workspaces, registers tasks, spawns one pipeline worker per task
//! and forwards status, cancellation and feedback requests to the registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::domain::{Feedback, FeedbackOptions, TaskSnapshot, generate_id};
use crate::pipeline::{Collaborators, PipelineEngine, PipelineSettings, SetupError, TaskOutcome};
use crate::scheduler::DependencyScheduler;
use crate::state::{RegistryResponse, TaskRegistry};

/// What to build
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub description: String,

    /// Working directory; defaults to `<workspace root>/<task id>`
    pub workdir: Option<PathBuf>,
}

impl TaskSpec {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            workdir: None,
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }
}

/// Orchestrates concurrently running task pipelines
pub struct TaskManager {
    registry: TaskRegistry,
    collaborators: Collaborators,
    settings: PipelineSettings,
    scheduler: DependencyScheduler,
    workspace_root: PathBuf,

    /// Concurrency limiter
    semaphore: Arc<Semaphore>,

    /// Running pipeline workers by task ID
    workers: Mutex<HashMap<String, JoinHandle<TaskOutcome>>>,
}

impl TaskManager {
    pub fn new(registry: TaskRegistry, collaborators: Collaborators, workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        debug!(?workspace_root, "TaskManager::new: called");
        Self {
            registry,
            collaborators,
            settings: PipelineSettings::default(),
            scheduler: DependencyScheduler::default(),
            workspace_root,
            semaphore: Arc::new(Semaphore::new(8)),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Build a manager with every tunable taken from `config`
    pub fn from_config(config: &Config, registry: TaskRegistry, collaborators: Collaborators) -> Self {
        Self::new(registry, collaborators, config.workspace.root_dir.clone())
            .with_settings(config.pipeline_settings())
            .with_scheduler(config.scheduler())
            .with_max_tasks(config.concurrency.max_tasks)
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_scheduler(mut self, scheduler: DependencyScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Limit concurrently running pipelines (at least one)
    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.semaphore = Arc::new(Semaphore::new(max_tasks.max(1)));
        self
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Create the workspace, register the task and start its pipeline
    ///
    /// Setup errors abort before the task is registered.
    pub async fn create_task(&self, spec: TaskSpec) -> Result<String, SetupError> {
        debug!(description_len = spec.description.len(), "create_task: called");
        if spec.description.trim().is_empty() {
            return Err(SetupError::EmptyDescription);
        }

        let task_id = generate_id("task", &spec.description);
        let workdir = spec.workdir.unwrap_or_else(|| self.workspace_root.join(&task_id));
        tokio::fs::create_dir_all(&workdir)
            .await
            .map_err(|source| SetupError::Workspace {
                path: workdir.clone(),
                source,
            })?;

        self.registry
            .create(task_id.clone(), spec.description, workdir.clone())
            .await?;

        let engine = PipelineEngine::new(task_id.clone(), workdir, self.registry.clone(), self.collaborators.clone())
            .with_settings(self.settings.clone())
            .with_scheduler(self.scheduler.clone());
        let semaphore = self.semaphore.clone();
        let registry = self.registry.clone();
        let worker_id = task_id.clone();

        let handle = tokio::spawn(async move {
            // Waiting for a slot leaves the task in Planning with zero progress
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    let reason = format!("concurrency limiter closed: {}", e);
                    if let Err(e) = registry.fail(&worker_id, reason.clone()).await {
                        warn!(task_id = %worker_id, error = %e, "Could not record failure");
                    }
                    return TaskOutcome::Failed { reason };
                }
            };
            debug!(task_id = %worker_id, "worker: acquired slot");
            engine.run().await
        });

        let finished = {
            let mut workers = self.workers.lock().await;
            let done: Vec<String> = workers
                .iter()
                .filter(|(_, h)| h.is_finished())
                .map(|(id, _)| id.clone())
                .collect();
            let finished: Vec<(String, JoinHandle<TaskOutcome>)> =
                done.into_iter().filter_map(|id| workers.remove_entry(&id)).collect();
            workers.insert(task_id.clone(), handle);
            finished
        };
        if !finished.is_empty() {
            debug!(count = finished.len(), "create_task: pruning finished workers");
        }
        for (id, handle) in finished {
            // Outcome stays readable from the registry; only panics need recording
            self.join_worker(&id, handle).await;
        }
        info!(%task_id, "Task created");
        Ok(task_id)
    }

    pub async fn get_status(&self, task_id: &str) -> RegistryResponse<Option<TaskSnapshot>> {
        debug!(%task_id, "get_status: called");
        self.registry.get(task_id).await
    }

    pub async fn list(&self) -> RegistryResponse<Vec<TaskSnapshot>> {
        self.registry.list().await
    }

    /// Request cooperative cancellation; false if absent or already terminal
    pub async fn cancel(&self, task_id: &str, actor_id: &str) -> RegistryResponse<bool> {
        debug!(%task_id, %actor_id, "cancel: called");
        let cancelled = self.registry.cancel(task_id, actor_id).await?;
        if cancelled {
            info!(%task_id, %actor_id, "Task cancelled");
        }
        Ok(cancelled)
    }

    /// Queue feedback for the task's next checkpoint
    ///
    /// Returns false for blank content and for absent or terminal tasks.
    pub async fn submit_feedback(
        &self,
        task_id: &str,
        content: &str,
        options: FeedbackOptions,
    ) -> RegistryResponse<bool> {
        debug!(%task_id, urgent = options.urgent, target = ?options.target_file, "submit_feedback: called");
        if content.trim().is_empty() {
            debug!(%task_id, "submit_feedback: empty content rejected");
            return Ok(false);
        }
        let feedback = Feedback::new(task_id, content.trim(), options);
        self.registry.submit_feedback(task_id, feedback).await
    }

    /// Wait for a task's pipeline to finish
    ///
    /// Tasks whose worker was already joined report the outcome recorded in
    /// the registry. None for unknown tasks and for tasks with no worker that
    /// have not reached a terminal status.
    pub async fn wait(&self, task_id: &str) -> Option<TaskOutcome> {
        debug!(%task_id, "wait: called");
        let handle = self.workers.lock().await.remove(task_id);
        match handle {
            Some(handle) => Some(self.join_worker(task_id, handle).await),
            None => {
                let snapshot = self.registry.get(task_id).await.ok()??;
                TaskOutcome::from_snapshot(&snapshot)
            }
        }
    }

    async fn join_worker(&self, task_id: &str, handle: JoinHandle<TaskOutcome>) -> TaskOutcome {
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let reason = format!("pipeline worker panicked: {}", e);
                warn!(%task_id, error = %e, "Pipeline worker failed");
                if let Err(e) = self.registry.fail(task_id, reason.clone()).await {
                    warn!(%task_id, error = %e, "Could not record failure");
                }
                TaskOutcome::Failed { reason }
            }
        }
    }

    /// Wait for every registered task
    pub async fn wait_all(&self) -> Vec<(String, TaskOutcome)> {
        let ids: Vec<String> = match self.registry.list().await {
            Ok(snapshots) => snapshots.into_iter().map(|s| s.id).collect(),
            Err(e) => {
                warn!(error = %e, "wait_all: registry unavailable, using tracked workers");
                self.workers.lock().await.keys().cloned().collect()
            }
        };
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(outcome) = self.wait(&id).await {
                outcomes.push((id, outcome));
            }
        }
        outcomes
    }
}
