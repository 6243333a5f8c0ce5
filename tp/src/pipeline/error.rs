//! Fatal pipeline errors

use std::path::PathBuf;

use thiserror::Error;

use crate::services::{ArchiveError, PlanError};
use crate::state::RegistryError;

/// Errors that end a task as Failed
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Planning failed: {0}")]
    Planning(#[from] PlanError),

    #[error("Archive failed: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Errors raised before a task is registered
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Failed to create workspace {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Task description is empty")]
    EmptyDescription,

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}
