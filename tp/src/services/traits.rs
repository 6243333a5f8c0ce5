//! Collaborator traits consumed by the pipeline
//!
//! Each collaborator is a black box behind a narrow async interface. The
//! engine receives them as `Arc<dyn ...>` at construction.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::error::{ArchiveError, FixError, GenerationError, NotifyError, PlanError, TestError};
use crate::domain::{ErrorInfo, Feedback, FileInfo, Plan};

/// What a collaborator knows about the task it is working on
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub description: String,
    pub workdir: PathBuf,
    pub plan: Plan,
}

/// Result of one verification run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub success: bool,
    pub output: String,
}

impl TestOutcome {
    pub fn passed(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// A plan rewritten in response to feedback
#[derive(Debug, Clone)]
pub struct PlanAdjustment {
    pub plan: Plan,

    /// Files marked `needs_update` must be regenerated
    pub requires_recoding: bool,
}

/// Payload for a notification
#[derive(Debug, Clone, Default)]
pub struct Notification {
    pub text: Option<String>,
    pub files: Vec<PathBuf>,
}

impl Notification {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            files: Vec::new(),
        }
    }
}

/// Produces and adjusts plans
#[async_trait]
pub trait Planner: Send + Sync {
    async fn create_plan(&self, description: &str) -> Result<Plan, PlanError>;

    async fn adjust_plan(&self, plan: Plan, feedback: &Feedback) -> Result<PlanAdjustment, PlanError>;

    /// Apply urgent feedback; defaults to folding `adjust_plan` over the items
    async fn handle_critical(&self, plan: Plan, feedback: &[Feedback]) -> Result<PlanAdjustment, PlanError> {
        debug!(count = feedback.len(), "handle_critical: called");
        let mut adjustment = PlanAdjustment {
            plan,
            requires_recoding: false,
        };
        for item in feedback {
            let next = self.adjust_plan(adjustment.plan, item).await?;
            adjustment = PlanAdjustment {
                plan: next.plan,
                requires_recoding: adjustment.requires_recoding || next.requires_recoding,
            };
        }
        Ok(adjustment)
    }
}

/// Produces the content of one planned file
#[async_trait]
pub trait FileGenerator: Send + Sync {
    async fn generate(&self, file: &FileInfo, ctx: &TaskContext) -> Result<String, GenerationError>;
}

#[async_trait]
pub trait Tester: Send + Sync {
    async fn run_tests(&self, ctx: &TaskContext) -> Result<TestOutcome, TestError>;
}

/// Attempts a repair; `Ok(true)` means a fix was attempted, not that it worked
#[async_trait]
pub trait Fixer: Send + Sync {
    async fn fix_error(&self, ctx: &TaskContext, error: &ErrorInfo) -> Result<bool, FixError>;
}

/// Delivers progress text; returns a message ID when the channel has one
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, target: &str, notification: Notification) -> Result<Option<String>, NotifyError>;
}

/// Packages a working directory into a deliverable
#[async_trait]
pub trait Archiver: Send + Sync {
    async fn archive(&self, task_id: &str, source_dir: &Path, excludes: &[String]) -> Result<PathBuf, ArchiveError>;
}

#[cfg(test)]
pub mod mock {
    //! Scriptable collaborators for unit tests

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Planner that returns a fixed plan and marks feedback target files
    pub struct MockPlanner {
        plan: Plan,
        fail: bool,
        pub adjust_calls: AtomicUsize,
        pub critical_calls: AtomicUsize,
        pub seen_descriptions: Mutex<Vec<String>>,
    }

    impl MockPlanner {
        pub fn new(plan: Plan) -> Self {
            Self {
                plan,
                fail: false,
                adjust_calls: AtomicUsize::new(0),
                critical_calls: AtomicUsize::new(0),
                seen_descriptions: Mutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(Plan::default())
            }
        }
    }

    #[async_trait]
    impl Planner for MockPlanner {
        async fn create_plan(&self, description: &str) -> Result<Plan, PlanError> {
            self.seen_descriptions.lock().unwrap().push(description.to_string());
            if self.fail {
                return Err(PlanError::Empty);
            }
            Ok(self.plan.clone())
        }

        async fn adjust_plan(&self, mut plan: Plan, feedback: &Feedback) -> Result<PlanAdjustment, PlanError> {
            self.adjust_calls.fetch_add(1, Ordering::SeqCst);
            let requires_recoding = match &feedback.target_file {
                Some(path) => plan.mark_needs_update(path),
                None => false,
            };
            Ok(PlanAdjustment { plan, requires_recoding })
        }

        async fn handle_critical(&self, plan: Plan, feedback: &[Feedback]) -> Result<PlanAdjustment, PlanError> {
            self.critical_calls.fetch_add(1, Ordering::SeqCst);
            let mut adjustment = PlanAdjustment {
                plan,
                requires_recoding: false,
            };
            for item in feedback {
                let next = self.adjust_plan(adjustment.plan, item).await?;
                adjustment.plan = next.plan;
                adjustment.requires_recoding |= next.requires_recoding;
            }
            Ok(adjustment)
        }
    }

    /// Generator that echoes the path, failing for listed paths
    #[derive(Default)]
    pub struct MockGenerator {
        pub failing_paths: Vec<String>,
        pub generated: Mutex<Vec<String>>,
    }

    impl MockGenerator {
        pub fn generated(&self) -> Vec<String> {
            self.generated.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FileGenerator for MockGenerator {
        async fn generate(&self, file: &FileInfo, _ctx: &TaskContext) -> Result<String, GenerationError> {
            self.generated.lock().unwrap().push(file.path.clone());
            if self.failing_paths.contains(&file.path) {
                return Err(GenerationError::NoContent(file.path.clone()));
            }
            Ok(format!("// {}\n", file.path))
        }
    }

    /// Tester that replays scripted outcomes, then repeats the last one
    pub struct MockTester {
        outcomes: Mutex<VecDeque<bool>>,
        last: Mutex<bool>,
        pub calls: AtomicUsize,
        delay: std::time::Duration,
    }

    impl MockTester {
        pub fn new(outcomes: Vec<bool>) -> Self {
            let last = outcomes.last().copied().unwrap_or(true);
            Self {
                outcomes: Mutex::new(outcomes.into()),
                last: Mutex::new(last),
                calls: AtomicUsize::new(0),
                delay: std::time::Duration::ZERO,
            }
        }

        pub fn always(success: bool) -> Self {
            Self::new(vec![success])
        }

        pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Tester for MockTester {
        async fn run_tests(&self, _ctx: &TaskContext) -> Result<TestOutcome, TestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let success = match self.outcomes.lock().unwrap().pop_front() {
                Some(s) => {
                    *self.last.lock().unwrap() = s;
                    s
                }
                None => *self.last.lock().unwrap(),
            };
            Ok(if success {
                TestOutcome::passed("ok")
            } else {
                TestOutcome::failed("1 test failed")
            })
        }
    }

    #[derive(Default)]
    pub struct MockFixer {
        pub calls: AtomicUsize,
        pub targets: Mutex<Vec<String>>,
    }

    impl MockFixer {
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fixer for MockFixer {
        async fn fix_error(&self, _ctx: &TaskContext, error: &ErrorInfo) -> Result<bool, FixError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.targets.lock().unwrap().push(error.message.clone());
            Ok(true)
        }
    }

    /// Archiver that records its input and returns a fake path
    #[derive(Default)]
    pub struct MockArchiver {
        pub fail: bool,
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl Archiver for MockArchiver {
        async fn archive(&self, task_id: &str, source_dir: &Path, _excludes: &[String]) -> Result<PathBuf, ArchiveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ArchiveError::MissingSource(source_dir.display().to_string()));
            }
            Ok(source_dir.join(format!("{}.zip", task_id)))
        }
    }

    /// Notifier that records texts and can be told to fail
    #[derive(Default)]
    pub struct MockNotifier {
        pub fail: bool,
        pub messages: Mutex<Vec<String>>,
    }

    impl MockNotifier {
        pub fn messages(&self) -> Vec<String> {
            self.messages.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for MockNotifier {
        async fn notify(&self, _target: &str, notification: Notification) -> Result<Option<String>, NotifyError> {
            self.messages
                .lock()
                .unwrap()
                .push(notification.text.unwrap_or_default());
            if self.fail {
                return Err(NotifyError::Delivery("mock failure".to_string()));
            }
            Ok(None)
        }
    }
}
