//! CLI command definitions and subcommands

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;

use crate::domain::FeedbackOptions;

/// taskpipe - feedback-aware task pipeline runner
#[derive(Debug, Parser)]
#[command(
    name = "tp",
    about = "Run multi-phase generation tasks that accept feedback mid-flight",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Log to stderr instead of the log file
    #[arg(long = "log-stderr", global = true)]
    pub log_stderr: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one task to completion
    ///
    /// Lines typed on stdin while the task runs are submitted as feedback.
    /// Start a line with `!` to mark it urgent and with `@path ` to target a file.
    Run {
        /// What to build
        description: String,

        /// Plan file (YAML or JSON)
        #[arg(short, long)]
        plan: PathBuf,

        /// Working directory (defaults to a fresh directory under the workspace root)
        #[arg(short, long)]
        workdir: Option<PathBuf>,

        /// Override the observation window
        #[arg(long)]
        observation_window_ms: Option<u64>,

        /// Override the repair budget
        #[arg(long)]
        max_debug_retries: Option<u32>,
    },

    /// Print the generation order for a plan file
    PlanOrder {
        /// Plan file (YAML or JSON)
        file: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the effective configuration
    Config,
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Parse a line typed during `tp run` into feedback
///
/// `!` prefix marks it urgent; `@path ` prefix targets a file. Blank lines
/// yield `None`.
pub fn parse_feedback_line(line: &str) -> Option<(String, FeedbackOptions)> {
    debug!(line_len = line.len(), "parse_feedback_line: called");
    let mut rest = line.trim();
    let mut options = FeedbackOptions::default();

    if let Some(stripped) = rest.strip_prefix('!') {
        options.urgent = true;
        rest = stripped.trim_start();
    }
    if let Some(stripped) = rest.strip_prefix('@') {
        let (path, content) = stripped.split_once(char::is_whitespace).unwrap_or((stripped, ""));
        if !path.is_empty() {
            options.target_file = Some(path.to_string());
        }
        rest = content.trim();
    }

    if rest.is_empty() {
        return None;
    }
    Some((rest.to_string(), options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from(["tp", "run", "todo app", "--plan", "plan.yml", "--max-debug-retries", "2"]);
        match cli.command {
            Command::Run {
                description,
                plan,
                max_debug_retries,
                observation_window_ms,
                ..
            } => {
                assert_eq!(description, "todo app");
                assert_eq!(plan, PathBuf::from("plan.yml"));
                assert_eq!(max_debug_retries, Some(2));
                assert_eq!(observation_window_ms, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_feedback_plain() {
        let (content, opts) = parse_feedback_line("  add a footer ").unwrap();
        assert_eq!(content, "add a footer");
        assert!(!opts.urgent);
        assert!(opts.target_file.is_none());
    }

    #[test]
    fn test_parse_feedback_urgent_with_target() {
        let (content, opts) = parse_feedback_line("! @src/app.ts use hooks").unwrap();
        assert_eq!(content, "use hooks");
        assert!(opts.urgent);
        assert_eq!(opts.target_file.as_deref(), Some("src/app.ts"));
    }

    #[test]
    fn test_parse_feedback_blank() {
        assert!(parse_feedback_line("   ").is_none());
        assert!(parse_feedback_line("!").is_none());
        assert!(parse_feedback_line("@src/a.ts").is_none());
    }
}
