//! Shell-command collaborators
//!
//! Generation, testing and fixing delegated to user-configured `sh -c`
//! commands run in the task working directory.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::error::{FixError, GenerationError, TestError};
use super::traits::{FileGenerator, Fixer, TaskContext, TestOutcome, Tester};
use crate::domain::{ErrorInfo, FileInfo};

/// Captured result of a shell command
#[derive(Debug, Clone)]
pub struct ShellOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Run a command with `sh -c` in `workdir`
///
/// Returns `Ok(None)` when the command exceeds `timeout`.
pub async fn run_shell(
    command: &str,
    workdir: &Path,
    env: &[(&str, String)],
    timeout: Duration,
) -> std::io::Result<Option<ShellOutput>> {
    debug!(%command, ?workdir, timeout_ms = timeout.as_millis() as u64, "run_shell: called");
    let start = std::time::Instant::now();

    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c").arg(command).current_dir(workdir).kill_on_drop(true);
    for (key, value) in env {
        cmd.env(key, value);
    }

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            let exit_code = output.status.code().unwrap_or(-1);
            debug!(exit_code, duration_ms, "run_shell: command completed");
            Ok(Some(ShellOutput {
                exit_code,
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                duration_ms,
            }))
        }
        Ok(Err(e)) => {
            debug!(error = %e, "run_shell: command execution failed");
            Err(e)
        }
        Err(_) => {
            debug!("run_shell: command timed out");
            Ok(None)
        }
    }
}

fn task_env(ctx: &TaskContext) -> Vec<(&'static str, String)> {
    vec![
        ("TASKPIPE_TASK_ID", ctx.task_id.clone()),
        ("TASKPIPE_TASK", ctx.description.clone()),
    ]
}

/// Generates file content from a command's stdout, or from plan-supplied content
#[derive(Debug, Clone)]
pub struct ShellGenerator {
    command: Option<String>,
    timeout: Duration,
}

impl ShellGenerator {
    pub fn new(command: Option<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl FileGenerator for ShellGenerator {
    async fn generate(&self, file: &FileInfo, ctx: &TaskContext) -> Result<String, GenerationError> {
        debug!(path = %file.path, task_id = %ctx.task_id, "ShellGenerator::generate: called");
        let Some(command) = &self.command else {
            debug!(path = %file.path, "ShellGenerator::generate: no command, using plan content");
            return file
                .content
                .clone()
                .ok_or_else(|| GenerationError::NoContent(file.path.clone()));
        };

        let mut env = task_env(ctx);
        env.push(("TASKPIPE_FILE", file.path.clone()));
        env.push(("TASKPIPE_FILE_DESCRIPTION", file.description.clone()));
        env.push(("TASKPIPE_DEPENDENCIES", file.dependencies.join(",")));

        let output = run_shell(command, &ctx.workdir, &env, self.timeout)
            .await?
            .ok_or_else(|| GenerationError::Timeout(file.path.clone()))?;

        if output.success() {
            Ok(output.stdout)
        } else {
            Err(GenerationError::CommandFailed {
                path: file.path.clone(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            })
        }
    }
}

/// Runs the configured test command; exit 0 is success
#[derive(Debug, Clone)]
pub struct ShellTester {
    command: Option<String>,
    timeout: Duration,
}

impl ShellTester {
    pub fn new(command: Option<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl Tester for ShellTester {
    async fn run_tests(&self, ctx: &TaskContext) -> Result<TestOutcome, TestError> {
        debug!(task_id = %ctx.task_id, "ShellTester::run_tests: called");
        let Some(command) = &self.command else {
            debug!("ShellTester::run_tests: no command configured");
            return Ok(TestOutcome::passed("no test command configured"));
        };

        let output = run_shell(command, &ctx.workdir, &task_env(ctx), self.timeout)
            .await?
            .ok_or(TestError::Timeout)?;
        Ok(TestOutcome {
            success: output.success(),
            output: output.combined(),
        })
    }
}

/// Runs the configured fix command with the error in the environment
#[derive(Debug, Clone)]
pub struct ShellFixer {
    command: Option<String>,
    timeout: Duration,
}

impl ShellFixer {
    pub fn new(command: Option<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl Fixer for ShellFixer {
    async fn fix_error(&self, ctx: &TaskContext, error: &ErrorInfo) -> Result<bool, FixError> {
        debug!(task_id = %ctx.task_id, error_type = %error.error_type, "ShellFixer::fix_error: called");
        let Some(command) = &self.command else {
            debug!("ShellFixer::fix_error: no command configured");
            return Ok(false);
        };

        let mut env = task_env(ctx);
        env.push(("TASKPIPE_ERROR_TYPE", error.error_type.clone()));
        env.push(("TASKPIPE_ERROR_MESSAGE", error.message.clone()));
        env.push(("TASKPIPE_ERROR_FILE", error.file_path.clone().unwrap_or_default()));

        let output = run_shell(command, &ctx.workdir, &env, self.timeout)
            .await?
            .ok_or(FixError::Timeout)?;
        if !output.success() {
            warn!(exit_code = output.exit_code, "Fix command exited non-zero");
        }
        Ok(true)
    }
}
