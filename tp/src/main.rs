//! taskpipe - feedback-aware task pipeline
//!
//! CLI entry point for running tasks and inspecting plans.

use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use taskpipe::cli::{Cli, Command, OutputFormat, parse_feedback_line};
use taskpipe::config::Config;
use taskpipe::manager::{TaskManager, TaskSpec};
use taskpipe::pipeline::{Collaborators, TaskOutcome};
use taskpipe::services::{
    ConsoleNotifier, PlanFilePlanner, ShellFixer, ShellGenerator, ShellTester, ZipArchiver, load_plan,
};
use taskpipe::state::TaskRegistry;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>, to_stderr: bool) -> Result<()> {
    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    if to_stderr {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_env_filter(filter)
            .init();
    } else {
        let log_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("taskpipe")
            .join("logs");
        fs::create_dir_all(&log_dir).context("Failed to create log directory")?;
        let log_file = fs::File::create(log_dir.join("taskpipe.log")).context("Failed to create log file")?;

        tracing_subscriber::fmt()
            .with_writer(log_file)
            .with_ansi(false)
            .with_env_filter(filter)
            .init();
    }

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A broken config still gets logging; the error surfaces from the full load below
    let config_log_level = Config::load(cli.config.as_ref()).ok().and_then(|c| c.log_level);
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref(), cli.log_stderr)
        .context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run {
            description,
            plan,
            workdir,
            observation_window_ms,
            max_debug_retries,
        } => {
            debug!(%description, ?plan, ?workdir, "main: matched Run command");
            cmd_run(
                &config,
                RunArgs {
                    description,
                    plan,
                    workdir,
                    observation_window_ms,
                    max_debug_retries,
                },
            )
            .await
        }
        Command::PlanOrder { file, format } => {
            debug!(?file, ?format, "main: matched PlanOrder command");
            cmd_plan_order(&config, &file, format)
        }
        Command::Config => {
            debug!("main: matched Config command");
            cmd_config(&config)
        }
    }
}

struct RunArgs {
    description: String,
    plan: PathBuf,
    workdir: Option<PathBuf>,
    observation_window_ms: Option<u64>,
    max_debug_retries: Option<u32>,
}

/// Run one task in the foreground, forwarding stdin lines as feedback
async fn cmd_run(config: &Config, args: RunArgs) -> Result<()> {
    debug!(plan = ?args.plan, "cmd_run: called");
    if !args.plan.exists() {
        return Err(eyre::eyre!("Plan file not found: {}", args.plan.display()));
    }

    let timeout = config.command_timeout();
    let collaborators = Collaborators {
        planner: Arc::new(PlanFilePlanner::new(&args.plan)),
        generator: Arc::new(ShellGenerator::new(config.commands.generate.clone(), timeout)),
        tester: Arc::new(ShellTester::new(config.commands.test.clone(), timeout)),
        fixer: Arc::new(ShellFixer::new(config.commands.fix.clone(), timeout)),
        archiver: Arc::new(ZipArchiver::new(config.archive_output_dir())),
    };

    let mut settings = config.pipeline_settings();
    if let Some(ms) = args.observation_window_ms {
        debug!(ms, "cmd_run: overriding observation window");
        settings.observation_window = Duration::from_millis(ms);
    }
    if let Some(max) = args.max_debug_retries {
        debug!(max, "cmd_run: overriding max_debug_retries");
        settings.max_debug_retries = max;
    }

    let registry = TaskRegistry::spawn_with_notifier(Arc::new(ConsoleNotifier));
    let manager = Arc::new(TaskManager::from_config(config, registry.clone(), collaborators).with_settings(settings));

    let mut spec = TaskSpec::new(args.description);
    if let Some(workdir) = args.workdir {
        spec = spec.with_workdir(workdir);
    }
    let task_id = manager.create_task(spec).await.context("Failed to create task")?;
    println!("Task {} started", task_id);

    let feedback_worker = spawn_feedback_forwarder(manager.clone(), task_id.clone());
    let cancel_worker = {
        let manager = manager.clone();
        let task_id = task_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!(%task_id, "Interrupted, cancelling task");
                if let Err(e) = manager.cancel(&task_id, "cli").await {
                    warn!(%task_id, error = %e, "Cancel request failed");
                }
            }
        })
    };

    let outcome = manager
        .wait(&task_id)
        .await
        .ok_or_else(|| eyre::eyre!("No pipeline running for task {}", task_id))?;
    feedback_worker.abort();
    cancel_worker.abort();
    debug!(?outcome, "cmd_run: pipeline finished");

    let result = match outcome {
        TaskOutcome::Completed {
            unresolved_errors,
            artifact,
        } => {
            if unresolved_errors {
                println!("Task {} completed with unresolved errors", task_id);
            } else {
                println!("Task {} completed", task_id);
            }
            println!("  Artifact: {}", artifact.display());
            Ok(())
        }
        TaskOutcome::Cancelled => {
            println!("Task {} cancelled", task_id);
            Ok(())
        }
        TaskOutcome::Failed { reason } => Err(eyre::eyre!("Task {} failed: {}", task_id, reason)),
    };

    if let Err(e) = registry.shutdown().await {
        debug!(error = %e, "cmd_run: registry already stopped");
    }
    result
}

/// Read stdin on a plain thread and submit each non-blank line as feedback
///
/// The reader thread is detached so a pending read never holds up exit.
fn spawn_feedback_forwarder(manager: Arc<TaskManager>, task_id: String) -> tokio::task::JoinHandle<()> {
    let (tx, mut rx) = mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let Some((content, options)) = parse_feedback_line(&line) else {
                continue;
            };
            let urgent = options.urgent;
            match manager.submit_feedback(&task_id, &content, options).await {
                Ok(true) => println!("Feedback queued{}", if urgent { " (urgent)" } else { "" }),
                Ok(false) => println!("Feedback not accepted (task finished)"),
                Err(e) => warn!(%task_id, error = %e, "Feedback submission failed"),
            }
        }
    })
}

/// Print the generation order for a plan file
fn cmd_plan_order(config: &Config, file: &Path, format: OutputFormat) -> Result<()> {
    debug!(?file, ?format, "cmd_plan_order: called");
    let plan = load_plan(file).context(format!("Failed to load plan {}", file.display()))?;
    let scheduler = config.scheduler();
    let ordered: Vec<&str> = scheduler.order(&plan.files).into_iter().map(|f| f.path.as_str()).collect();

    match format {
        OutputFormat::Text => {
            for path in ordered {
                println!("{}", path);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&ordered)?);
        }
    }
    Ok(())
}

/// Print the effective configuration as YAML
fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}
