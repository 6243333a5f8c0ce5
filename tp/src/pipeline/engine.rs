//! PipelineEngine - drives one task through its phases
//!
//! Planning -> Coding -> Testing -> [Debugging] -> Finalizing. Feedback is
//! consulted only at checkpoints, and cancellation is observed only at
//! phase boundaries.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::domain::{ErrorInfo, FileStatus, Phase, Plan, TaskSnapshot, TaskStatus};
use crate::scheduler::DependencyScheduler;
use crate::services::{
    Archiver, DEFAULT_EXCLUDES, FileGenerator, Fixer, Planner, TaskContext, TestOutcome, Tester,
};
use crate::state::TaskRegistry;

use super::error::PipelineError;
use super::repair::RepairLoop;

/// Tunables for one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_debug_retries: u32,

    /// Pause after Coding and after Testing during which feedback can arrive
    pub observation_window: Duration,

    /// Bound on feedback-driven recode/retest rounds after Testing
    pub max_recode_rounds: u32,

    pub archive_excludes: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_debug_retries: 3,
            observation_window: Duration::from_secs(30),
            max_recode_rounds: 3,
            archive_excludes: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// The external collaborators a pipeline calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub planner: Arc<dyn Planner>,
    pub generator: Arc<dyn FileGenerator>,
    pub tester: Arc<dyn Tester>,
    pub fixer: Arc<dyn Fixer>,
    pub archiver: Arc<dyn Archiver>,
}

/// Final result of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed { unresolved_errors: bool, artifact: PathBuf },
    Failed { reason: String },
    Cancelled,
}

/// Completion message prefix when errors remain
const UNRESOLVED_MESSAGE: &str = "completed with unresolved errors";

impl TaskOutcome {
    /// Rebuild the outcome of a task that already reached a terminal status
    pub fn from_snapshot(snapshot: &TaskSnapshot) -> Option<Self> {
        match snapshot.status {
            TaskStatus::Completed => Some(Self::Completed {
                unresolved_errors: snapshot.progress.message.starts_with(UNRESOLVED_MESSAGE),
                artifact: snapshot.artifact_path.clone().unwrap_or_default(),
            }),
            TaskStatus::Failed => Some(Self::Failed {
                reason: snapshot.progress.message.clone(),
            }),
            TaskStatus::Cancelled => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Runs one task to a terminal state
pub struct PipelineEngine {
    pub(super) task_id: String,
    pub(super) description: String,
    pub(super) workdir: PathBuf,
    pub(super) registry: TaskRegistry,
    pub(super) collaborators: Collaborators,
    pub(super) settings: PipelineSettings,
    pub(super) scheduler: DependencyScheduler,
    pub(super) started: Instant,
}

impl PipelineEngine {
    pub fn new(
        task_id: impl Into<String>,
        workdir: impl Into<PathBuf>,
        registry: TaskRegistry,
        collaborators: Collaborators,
    ) -> Self {
        let task_id = task_id.into();
        let workdir = workdir.into();
        debug!(%task_id, ?workdir, "PipelineEngine::new: called");
        Self {
            task_id,
            description: String::new(),
            workdir,
            registry,
            collaborators,
            settings: PipelineSettings::default(),
            scheduler: DependencyScheduler::default(),
            started: Instant::now(),
        }
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        debug!(task_id = %self.task_id, ?settings, "with_settings: called");
        self.settings = settings;
        self
    }

    pub fn with_scheduler(mut self, scheduler: DependencyScheduler) -> Self {
        debug!(task_id = %self.task_id, "with_scheduler: called");
        self.scheduler = scheduler;
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Run to a terminal state, recording failures in the registry
    pub async fn run(mut self) -> TaskOutcome {
        info!(task_id = %self.task_id, "Starting pipeline");
        self.started = Instant::now();

        match self.execute().await {
            Ok(outcome) => {
                info!(task_id = %self.task_id, ?outcome, "Pipeline finished");
                outcome
            }
            Err(e) => {
                let reason = e.to_string();
                error!(task_id = %self.task_id, error = %reason, "Pipeline failed");
                match self.registry.fail(&self.task_id, reason.clone()).await {
                    Ok(true) => TaskOutcome::Failed { reason },
                    Ok(false) => self.terminal_outcome().await.unwrap_or(TaskOutcome::Failed { reason }),
                    Err(reg) => {
                        warn!(task_id = %self.task_id, error = %reg, "Could not record failure");
                        TaskOutcome::Failed { reason }
                    }
                }
            }
        }
    }

    /// Outcome for a task some other actor already finished
    async fn terminal_outcome(&self) -> Option<TaskOutcome> {
        let snapshot = self.registry.get(&self.task_id).await.ok()??;
        match snapshot.status {
            TaskStatus::Cancelled | TaskStatus::Failed => TaskOutcome::from_snapshot(&snapshot),
            _ => None,
        }
    }

    async fn execute(&mut self) -> Result<TaskOutcome, PipelineError> {
        let snapshot = self.registry.get_required(&self.task_id).await?;
        self.description = snapshot.description;

        // Planning
        if self.is_cancelled().await? {
            return Ok(TaskOutcome::Cancelled);
        }
        self.drain_before_planning().await?;
        self.progress(Phase::Planning, 0.0, "creating plan").await?;
        let mut plan = self.collaborators.planner.create_plan(&self.description).await?;
        self.registry.set_plan(&self.task_id, plan.clone()).await?;
        self.progress(Phase::Planning, 1.0, format!("plan ready: {} files", plan.files.len()))
            .await?;

        // Coding
        if self.is_cancelled().await? {
            return Ok(TaskOutcome::Cancelled);
        }
        self.checkpoint(Phase::Coding.label(), &mut plan).await?;
        self.generate_all(&mut plan).await?;
        self.observation_window(Phase::Coding, 1.0).await?;

        // Testing
        if self.is_cancelled().await? {
            return Ok(TaskOutcome::Cancelled);
        }
        self.checkpoint(Phase::Testing.label(), &mut plan).await?;
        if self.requires_recoding().await? {
            self.recode(&mut plan).await?;
        }
        let mut outcome = self.verify(&mut plan).await?;

        let mut rounds = 0;
        while self.requires_recoding().await? {
            if rounds >= self.settings.max_recode_rounds {
                warn!(task_id = %self.task_id, rounds, "Recode round limit reached, ignoring further recode requests");
                self.registry.set_requires_recoding(&self.task_id, false).await?;
                break;
            }
            if self.is_cancelled().await? {
                return Ok(TaskOutcome::Cancelled);
            }
            rounds += 1;
            self.recode(&mut plan).await?;
            outcome = self.verify(&mut plan).await?;
        }

        // Debugging
        let mut tests_passing = outcome.success;
        if !outcome.success {
            if self.is_cancelled().await? {
                return Ok(TaskOutcome::Cancelled);
            }
            let has_errors = !self.registry.get_required(&self.task_id).await?.errors.is_empty();
            if has_errors {
                let repair = RepairLoop::new(self.settings.max_debug_retries)
                    .run(
                        &self.registry,
                        self.collaborators.fixer.as_ref(),
                        self.collaborators.tester.as_ref(),
                        &self.context(&plan),
                    )
                    .await?;
                tests_passing = repair.resolved;
            }
        }

        // Finalizing
        if self.is_cancelled().await? {
            return Ok(TaskOutcome::Cancelled);
        }
        let artifact = self.finalize().await?;

        let failed_files = plan.count_with_status(FileStatus::Error);
        let unresolved_errors = !tests_passing || failed_files > 0;
        let message = if unresolved_errors {
            let errors = self.registry.get_required(&self.task_id).await?.errors.len();
            format!("{} ({} recorded, {} files failed)", UNRESOLVED_MESSAGE, errors, failed_files)
        } else {
            "completed".to_string()
        };

        if !self.registry.complete(&self.task_id, message).await? {
            return Ok(self.terminal_outcome().await.unwrap_or(TaskOutcome::Cancelled));
        }
        Ok(TaskOutcome::Completed {
            unresolved_errors,
            artifact,
        })
    }

    pub(super) async fn is_cancelled(&self) -> Result<bool, PipelineError> {
        let snapshot = self.registry.get_required(&self.task_id).await?;
        let cancelled = snapshot.status == TaskStatus::Cancelled;
        if cancelled {
            info!(task_id = %self.task_id, "Task cancelled, halting at phase boundary");
        }
        Ok(cancelled)
    }

    async fn requires_recoding(&self) -> Result<bool, PipelineError> {
        Ok(self.registry.get_required(&self.task_id).await?.requires_recoding)
    }

    async fn progress(&self, phase: Phase, fraction: f64, message: impl Into<String>) -> Result<(), PipelineError> {
        self.registry
            .update_progress(&self.task_id, phase, fraction, message)
            .await?;
        Ok(())
    }

    pub(super) fn context(&self, plan: &Plan) -> TaskContext {
        TaskContext {
            task_id: self.task_id.clone(),
            description: self.description.clone(),
            workdir: self.workdir.clone(),
            plan: plan.clone(),
        }
    }

    /// Generate every planned file in dependency order
    async fn generate_all(&mut self, plan: &mut Plan) -> Result<(), PipelineError> {
        let order: Vec<String> = self
            .scheduler
            .order(&plan.files)
            .into_iter()
            .map(|f| f.path.clone())
            .collect();
        info!(task_id = %self.task_id, files = order.len(), "Generating files");
        self.generate_paths(plan, &order, FileStatus::Generated).await?;

        // A full generation pass covers any regeneration requested before it
        for file in &mut plan.files {
            file.needs_update = false;
        }
        self.registry.set_plan(&self.task_id, plan.clone()).await?;
        self.registry.set_requires_recoding(&self.task_id, false).await?;
        Ok(())
    }

    /// Regenerate only files marked `needs_update`
    async fn recode(&mut self, plan: &mut Plan) -> Result<(), PipelineError> {
        let subset: Vec<_> = plan.files_needing_update().into_iter().cloned().collect();
        let order: Vec<String> = self
            .scheduler
            .order(&subset)
            .into_iter()
            .map(|f| f.path.clone())
            .collect();
        info!(task_id = %self.task_id, files = order.len(), "Recoding files");
        self.generate_paths(plan, &order, FileStatus::Updated).await?;

        for file in &mut plan.files {
            file.needs_update = false;
        }
        self.registry.set_plan(&self.task_id, plan.clone()).await?;
        self.registry.set_requires_recoding(&self.task_id, false).await?;
        Ok(())
    }

    /// Generate the given paths in order; per-file failures are recorded, not raised
    async fn generate_paths(
        &mut self,
        plan: &mut Plan,
        order: &[String],
        success_status: FileStatus,
    ) -> Result<(), PipelineError> {
        let total = order.len().max(1) as f64;
        for (i, path) in order.iter().enumerate() {
            let Some(file) = plan.file(path).cloned() else {
                continue;
            };
            let ctx = self.context(plan);
            let result = match self.collaborators.generator.generate(&file, &ctx).await {
                Ok(content) => write_file(&self.workdir, path, &content).await.map(|_| content),
                Err(e) => Err(e.to_string()),
            };

            let message = match result {
                Ok(content) => {
                    if let Some(entry) = plan.file_mut(path) {
                        entry.content = Some(content);
                        entry.status = success_status;
                    }
                    format!("generated {}", path)
                }
                Err(reason) => {
                    warn!(task_id = %self.task_id, %path, error = %reason, "File generation failed");
                    if let Some(entry) = plan.file_mut(path) {
                        entry.status = FileStatus::Error;
                    }
                    self.registry
                        .push_error(
                            &self.task_id,
                            ErrorInfo::new("generation_error", reason).with_file(path.clone()),
                        )
                        .await?;
                    format!("failed to generate {}", path)
                }
            };
            self.progress(Phase::Coding, (i + 1) as f64 / total, message).await?;
        }
        self.registry.set_plan(&self.task_id, plan.clone()).await?;
        Ok(())
    }

    /// Test, then critical check, observation window and post-testing checkpoint
    async fn verify(&mut self, plan: &mut Plan) -> Result<TestOutcome, PipelineError> {
        self.progress(Phase::Testing, 0.0, "running tests").await?;
        let outcome = run_tests_recovering(self.collaborators.tester.as_ref(), &self.context(plan)).await;
        if outcome.success {
            self.progress(Phase::Testing, 0.5, "tests passed").await?;
        } else {
            self.registry
                .push_error(&self.task_id, ErrorInfo::new("test_failure", outcome.output.clone()))
                .await?;
            self.progress(Phase::Testing, 0.5, "tests failed").await?;
        }

        self.handle_critical(plan).await?;
        self.observation_window(Phase::Testing, 0.75).await?;
        self.checkpoint("post-testing", plan).await?;
        Ok(outcome)
    }
}

/// Run the tester, treating a runner error as a failed run
pub(super) async fn run_tests_recovering(tester: &dyn Tester, ctx: &TaskContext) -> TestOutcome {
    match tester.run_tests(ctx).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(task_id = %ctx.task_id, error = %e, "Test runner error");
            TestOutcome::failed(format!("test runner error: {}", e))
        }
    }
}

/// Resolve a plan path inside the workdir, refusing anything that escapes it
fn resolve_in_workdir(workdir: &Path, path: &str) -> Option<PathBuf> {
    let relative = Path::new(path);
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    (safe && !path.is_empty()).then(|| workdir.join(relative))
}

async fn write_file(workdir: &Path, path: &str, content: &str) -> Result<(), String> {
    let target = resolve_in_workdir(workdir, path).ok_or_else(|| format!("path escapes workdir: {}", path))?;
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("create {}: {}", parent.display(), e))?;
    }
    tokio::fs::write(&target, content)
        .await
        .map_err(|e| format!("write {}: {}", target.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FeedbackOptions, FileInfo, Feedback};
    use crate::services::mock::{MockArchiver, MockFixer, MockGenerator, MockPlanner, MockTester};
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    fn sample_plan() -> Plan {
        Plan::new(vec![
            FileInfo::new("src/index.ts").with_dependencies(["src/utils.ts"]),
            FileInfo::new("package.json"),
            FileInfo::new("src/utils.ts"),
        ])
    }

    struct Harness {
        registry: TaskRegistry,
        planner: Arc<MockPlanner>,
        generator: Arc<MockGenerator>,
        tester: Arc<MockTester>,
        fixer: Arc<MockFixer>,
        archiver: Arc<MockArchiver>,
        workdir: tempfile::TempDir,
    }

    impl Harness {
        async fn new(planner: MockPlanner, generator: MockGenerator, tester: MockTester) -> Self {
            let registry = TaskRegistry::spawn();
            let workdir = tempdir().unwrap();
            registry.create("t-1", "build a thing", workdir.path()).await.unwrap();
            Self {
                registry,
                planner: Arc::new(planner),
                generator: Arc::new(generator),
                tester: Arc::new(tester),
                fixer: Arc::new(MockFixer::default()),
                archiver: Arc::new(MockArchiver::default()),
                workdir,
            }
        }

        fn engine(&self, settings: PipelineSettings) -> PipelineEngine {
            let collaborators = Collaborators {
                planner: self.planner.clone(),
                generator: self.generator.clone(),
                tester: self.tester.clone(),
                fixer: self.fixer.clone(),
                archiver: self.archiver.clone(),
            };
            PipelineEngine::new("t-1", self.workdir.path(), self.registry.clone(), collaborators).with_settings(settings)
        }
    }

    fn fast(max_debug_retries: u32) -> PipelineSettings {
        PipelineSettings {
            max_debug_retries,
            observation_window: Duration::ZERO,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_happy_path_generates_in_order_and_completes() {
        let h = Harness::new(MockPlanner::new(sample_plan()), MockGenerator::default(), MockTester::always(true)).await;
        let outcome = h.engine(fast(3)).run().await;

        match outcome {
            TaskOutcome::Completed { unresolved_errors, .. } => assert!(!unresolved_errors),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(h.generator.generated(), vec!["package.json", "src/utils.ts", "src/index.ts"]);
        assert!(h.workdir.path().join("src/utils.ts").exists());
        assert_eq!(h.fixer.calls(), 0);

        let snap = h.registry.get_required("t-1").await.unwrap();
        assert_eq!(snap.status, TaskStatus::Completed);
        assert_eq!(snap.progress.overall, 1.0);
        assert!(snap.artifact_path.is_some());
        assert!(snap.duration_ms.is_some());
        assert_eq!(snap.plan.unwrap().count_with_status(FileStatus::Generated), 3);
    }

    #[tokio::test]
    async fn test_generation_failure_is_not_fatal() {
        let generator = MockGenerator {
            failing_paths: vec!["src/utils.ts".to_string()],
            ..Default::default()
        };
        let h = Harness::new(MockPlanner::new(sample_plan()), generator, MockTester::always(true)).await;
        let outcome = h.engine(fast(3)).run().await;

        assert!(matches!(outcome, TaskOutcome::Completed { unresolved_errors: true, .. }));
        assert_eq!(h.generator.generated().len(), 3);

        let snap = h.registry.get_required("t-1").await.unwrap();
        let plan = snap.plan.unwrap();
        assert_eq!(plan.file("src/utils.ts").unwrap().status, FileStatus::Error);
        assert_eq!(snap.errors[0].error_type, "generation_error");
        assert_eq!(snap.errors[0].file_path.as_deref(), Some("src/utils.ts"));
    }

    #[tokio::test]
    async fn test_repair_exhaustion_completes_with_annotation() {
        let h = Harness::new(MockPlanner::new(sample_plan()), MockGenerator::default(), MockTester::always(false)).await;
        let outcome = h.engine(fast(2)).run().await;

        assert!(matches!(outcome, TaskOutcome::Completed { unresolved_errors: true, .. }));
        assert_eq!(h.fixer.calls(), 2);
        // initial run plus one retest per cycle
        assert_eq!(h.tester.calls(), 3);

        let snap = h.registry.get_required("t-1").await.unwrap();
        assert_eq!(snap.status, TaskStatus::Completed);
        assert!(snap.progress.message.contains("unresolved errors"));
        assert_eq!(TaskOutcome::from_snapshot(&snap), Some(outcome));
    }

    #[tokio::test]
    async fn test_repair_success_completes_clean() {
        let h = Harness::new(
            MockPlanner::new(sample_plan()),
            MockGenerator::default(),
            MockTester::new(vec![false, true]),
        )
        .await;
        let outcome = h.engine(fast(3)).run().await;
        assert!(matches!(outcome, TaskOutcome::Completed { unresolved_errors: false, .. }));
        assert_eq!(h.fixer.calls(), 1);
    }

    #[tokio::test]
    async fn test_planning_failure_fails_task() {
        let h = Harness::new(MockPlanner::failing(), MockGenerator::default(), MockTester::always(true)).await;
        let outcome = h.engine(fast(3)).run().await;

        assert!(matches!(outcome, TaskOutcome::Failed { .. }));
        assert_eq!(h.registry.get_required("t-1").await.unwrap().status, TaskStatus::Failed);
        assert!(h.generator.generated().is_empty());
    }

    #[tokio::test]
    async fn test_archive_failure_fails_task() {
        let mut h = Harness::new(MockPlanner::new(sample_plan()), MockGenerator::default(), MockTester::always(true)).await;
        h.archiver = Arc::new(MockArchiver {
            fail: true,
            ..Default::default()
        });
        let outcome = h.engine(fast(3)).run().await;

        match outcome {
            TaskOutcome::Failed { reason } => assert!(reason.contains("Archive failed")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let snap = h.registry.get_required("t-1").await.unwrap();
        assert_eq!(snap.status, TaskStatus::Failed);
        assert!(snap.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_cancel_before_start_halts_immediately() {
        let h = Harness::new(MockPlanner::new(sample_plan()), MockGenerator::default(), MockTester::always(true)).await;
        h.registry.cancel("t-1", "user").await.unwrap();

        let outcome = h.engine(fast(3)).run().await;
        assert_eq!(outcome, TaskOutcome::Cancelled);
        assert!(h.planner.seen_descriptions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_observation_window_halts_before_testing() {
        let h = Harness::new(MockPlanner::new(sample_plan()), MockGenerator::default(), MockTester::always(true)).await;
        let settings = PipelineSettings {
            observation_window: Duration::from_secs(30),
            ..fast(3)
        };
        let engine = h.engine(settings);
        let handle = tokio::spawn(engine.run());

        // Wait until Coding has finished and the window is open
        loop {
            let snap = h.registry.get_required("t-1").await.unwrap();
            if snap.progress.message.starts_with("waiting") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        h.registry.cancel("t-1", "user").await.unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert_eq!(outcome, TaskOutcome::Cancelled);
        assert_eq!(h.tester.calls(), 0);
        assert!(h.workdir.path().join("src/index.ts").exists());
    }

    #[tokio::test]
    async fn test_feedback_before_planning_is_folded_into_description() {
        let h = Harness::new(MockPlanner::new(sample_plan()), MockGenerator::default(), MockTester::always(true)).await;
        h.registry
            .submit_feedback("t-1", Feedback::new("t-1", "use sqlite", FeedbackOptions::default()))
            .await
            .unwrap();

        h.engine(fast(3)).run().await;
        let seen = h.planner.seen_descriptions.lock().unwrap().clone();
        assert!(seen[0].contains("use sqlite"));

        let snap = h.registry.get_required("t-1").await.unwrap();
        assert_eq!(snap.feedback[0].status, crate::domain::FeedbackStatus::Applied);
        assert_eq!(snap.last_processed_index, Some(0));
    }

    #[tokio::test]
    async fn test_recoding_regenerates_only_marked_files() {
        let h = Harness::new(
            MockPlanner::new(sample_plan()),
            MockGenerator::default(),
            MockTester::always(true).with_delay(Duration::from_millis(200)),
        )
        .await;
        let engine = h.engine(fast(3));
        let handle = tokio::spawn(engine.run());

        loop {
            let snap = h.registry.get_required("t-1").await.unwrap();
            if snap.status == TaskStatus::Testing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let fb = Feedback::new("t-1", "rewrite utils", FeedbackOptions::default().with_target_file("src/utils.ts"));
        assert!(h.registry.submit_feedback("t-1", fb).await.unwrap());

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Completed { .. }));
        assert_eq!(
            h.generator.generated(),
            vec!["package.json", "src/utils.ts", "src/index.ts", "src/utils.ts"]
        );
        assert_eq!(h.tester.calls(), 2);
        let plan = h.registry.get_required("t-1").await.unwrap().plan.unwrap();
        assert_eq!(plan.file("src/utils.ts").unwrap().status, FileStatus::Updated);
        assert!(plan.files_needing_update().is_empty());
    }

    #[tokio::test]
    async fn test_critical_feedback_mid_testing_handled_once() {
        let h = Harness::new(
            MockPlanner::new(sample_plan()),
            MockGenerator::default(),
            MockTester::always(true).with_delay(Duration::from_millis(200)),
        )
        .await;
        let handle = tokio::spawn(h.engine(fast(3)).run());

        loop {
            if h.registry.get_required("t-1").await.unwrap().status == TaskStatus::Testing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(h
            .registry
            .submit_feedback("t-1", Feedback::new("t-1", "stop", FeedbackOptions::urgent()))
            .await
            .unwrap());
        assert!(h.registry.get_required("t-1").await.unwrap().has_critical_feedback);

        handle.await.unwrap();
        assert_eq!(h.planner.critical_calls.load(Ordering::SeqCst), 1);
        // The post-testing checkpoint does not re-apply it
        assert_eq!(h.planner.adjust_calls.load(Ordering::SeqCst), 1);

        let snap = h.registry.get_required("t-1").await.unwrap();
        assert!(!snap.has_critical_feedback);
        assert_eq!(snap.feedback[0].status, crate::domain::FeedbackStatus::Applied);
    }

    #[tokio::test]
    async fn test_critical_feedback_during_coding_window_handled_after_testing() {
        let h = Harness::new(MockPlanner::new(sample_plan()), MockGenerator::default(), MockTester::always(true)).await;
        let settings = PipelineSettings {
            observation_window: Duration::from_millis(300),
            ..fast(3)
        };
        let handle = tokio::spawn(h.engine(settings).run());

        loop {
            let snap = h.registry.get_required("t-1").await.unwrap();
            if snap.status == TaskStatus::Coding && snap.progress.message.starts_with("waiting") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(h
            .registry
            .submit_feedback("t-1", Feedback::new("t-1", "switch to postgres", FeedbackOptions::urgent()))
            .await
            .unwrap());
        assert!(h.registry.get_required("t-1").await.unwrap().has_critical_feedback);

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, TaskOutcome::Completed { .. }));
        assert_eq!(h.planner.critical_calls.load(Ordering::SeqCst), 1);
        // Once by the pre-testing checkpoint, once inside the mock's critical fold
        assert_eq!(h.planner.adjust_calls.load(Ordering::SeqCst), 2);

        let snap = h.registry.get_required("t-1").await.unwrap();
        assert!(!snap.has_critical_feedback);
        assert_eq!(snap.feedback.len(), 1);
        assert_eq!(snap.feedback[0].status, crate::domain::FeedbackStatus::Applied);
        assert_eq!(snap.last_processed_index, Some(0));
    }

    #[test]
    fn test_outcome_from_snapshot_only_for_terminal_tasks() {
        use crate::domain::Task;

        let mut task = Task::new("t-1", "demo", "/w");
        assert_eq!(TaskOutcome::from_snapshot(&task.snapshot()), None);
        task.update_progress(Phase::Debugging, 0.5, "fixing");
        assert_eq!(TaskOutcome::from_snapshot(&task.snapshot()), None);

        let mut done = task.clone();
        done.artifact_path = Some(PathBuf::from("/w/t-1.zip"));
        done.complete("completed");
        assert_eq!(
            TaskOutcome::from_snapshot(&done.snapshot()),
            Some(TaskOutcome::Completed {
                unresolved_errors: false,
                artifact: PathBuf::from("/w/t-1.zip"),
            })
        );

        let mut failed = task.clone();
        failed.fail("planner exploded");
        assert_eq!(
            TaskOutcome::from_snapshot(&failed.snapshot()),
            Some(TaskOutcome::Failed {
                reason: "planner exploded".to_string()
            })
        );

        task.cancel("user");
        assert_eq!(TaskOutcome::from_snapshot(&task.snapshot()), Some(TaskOutcome::Cancelled));
    }

    #[test]
    fn test_resolve_in_workdir_rejects_escapes() {
        let root = Path::new("/w");
        assert_eq!(resolve_in_workdir(root, "src/a.ts"), Some(PathBuf::from("/w/src/a.ts")));
        assert_eq!(resolve_in_workdir(root, "../etc/passwd"), None);
        assert_eq!(resolve_in_workdir(root, "/etc/passwd"), None);
        assert_eq!(resolve_in_workdir(root, ""), None);
    }
}
