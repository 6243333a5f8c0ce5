//! External collaborators
//!
//! Traits the pipeline consumes plus the local default implementations used
//! by the `tp` binary.

mod archive;
mod error;
mod notify;
mod planner;
mod shell;
mod traits;

pub use archive::{DEFAULT_EXCLUDES, ZipArchiver};
pub use error::{ArchiveError, FixError, GenerationError, NotifyError, PlanError, TestError};
pub use notify::{ConsoleNotifier, TracingNotifier};
pub use planner::{PlanFilePlanner, load_plan, parse_plan};
pub use shell::{ShellFixer, ShellGenerator, ShellOutput, ShellTester, run_shell};
#[cfg(test)]
pub use traits::mock;
pub use traits::{
    Archiver, FileGenerator, Fixer, Notification, Notifier, PlanAdjustment, Planner, TaskContext, TestOutcome, Tester,
};
