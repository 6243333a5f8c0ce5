//! taskpipe configuration types and loading

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineSettings;
use crate::scheduler::{DEFAULT_CONFIG_FILENAMES, DependencyScheduler};
use crate::services::DEFAULT_EXCLUDES;

/// Main taskpipe configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Phase machine tunables
    pub pipeline: PipelineConfig,

    /// Where task working directories live
    pub workspace: WorkspaceConfig,

    /// Deliverable packaging
    pub archive: ArchiveConfig,

    /// Shell commands backing the default collaborators
    pub commands: CommandsConfig,

    /// Concurrency limits
    pub concurrency: ConcurrencyConfig,

    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.config_filenames.iter().any(|n| n.trim().is_empty()) {
            return Err(eyre::eyre!("pipeline.config-filenames must not contain empty names"));
        }
        if self.concurrency.max_tasks == 0 {
            return Err(eyre::eyre!("concurrency.max-tasks must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config: .taskpipe.yml
        let local_config = PathBuf::from(".taskpipe.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User config: ~/.config/taskpipe/taskpipe.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("taskpipe").join("taskpipe.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Engine settings derived from the pipeline and archive sections
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_debug_retries: self.pipeline.max_debug_retries,
            observation_window: Duration::from_millis(self.pipeline.observation_window_ms),
            max_recode_rounds: self.pipeline.max_recode_rounds,
            archive_excludes: self.archive.exclude.clone(),
        }
    }

    pub fn scheduler(&self) -> DependencyScheduler {
        DependencyScheduler::new(self.pipeline.config_filenames.clone())
    }

    /// Archive output directory, defaulting to the workspace root
    pub fn archive_output_dir(&self) -> PathBuf {
        self.archive
            .output_dir
            .clone()
            .unwrap_or_else(|| self.workspace.root_dir.clone())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.commands.timeout_ms)
    }
}

/// Phase machine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fix/retest cycles in the Debugging phase
    #[serde(rename = "max-debug-retries")]
    pub max_debug_retries: u32,

    /// Pause after Coding and Testing for late feedback
    #[serde(rename = "observation-window-ms")]
    pub observation_window_ms: u64,

    /// Feedback-driven recode/retest rounds after Testing
    #[serde(rename = "max-recode-rounds")]
    pub max_recode_rounds: u32,

    /// File names generated before everything else
    #[serde(rename = "config-filenames")]
    pub config_filenames: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_debug_retries: 3,
            observation_window_ms: 30_000,
            max_recode_rounds: 3,
            config_filenames: DEFAULT_CONFIG_FILENAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Parent of per-task working directories
    #[serde(rename = "root-dir")]
    pub root_dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        // XDG data directory (~/.local/share/taskpipe/workspaces on Linux)
        let root_dir = dirs::data_dir()
            .map(|d| d.join("taskpipe"))
            .unwrap_or_else(|| PathBuf::from(".taskpipe"))
            .join("workspaces");
        Self { root_dir }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Glob patterns matched against each path component
    pub exclude: Vec<String>,

    #[serde(rename = "output-dir")]
    pub output_dir: Option<PathBuf>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            exclude: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            output_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    /// Prints a file's content to stdout
    pub generate: Option<String>,

    /// Exit 0 means the deliverable passes
    pub test: Option<String>,

    /// Attempts to repair the error described in TASKPIPE_ERROR_*
    pub fix: Option<String>,

    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            generate: None,
            test: None,
            fix: None,
            timeout_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum concurrently running pipelines
    #[serde(rename = "max-tasks")]
    pub max_tasks: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { max_tasks: 8 }
    }
}
