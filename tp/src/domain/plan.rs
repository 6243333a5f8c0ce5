//! Plan and file graph
//!
//! A plan is the declarative description of a task's deliverable: the files
//! to produce, their dependency edges, and a technology-stack summary.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Generation status of a single planned file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    #[default]
    Pending,
    Generated,
    Modified,
    Error,
    Updated,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Generated => write!(f, "generated"),
            Self::Modified => write!(f, "modified"),
            Self::Error => write!(f, "error"),
            Self::Updated => write!(f, "updated"),
        }
    }
}

/// One file of the deliverable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Path relative to the task working directory (unique within a plan)
    pub path: String,

    /// Short description of what the file should contain
    #[serde(default)]
    pub description: String,

    /// Content, once generated (or pre-supplied by the plan)
    #[serde(default)]
    pub content: Option<String>,

    #[serde(default)]
    pub status: FileStatus,

    /// Paths this file depends on; paths not in the plan are ignored
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Set by feedback handling when the file must be regenerated
    #[serde(default, rename = "needs-update")]
    pub needs_update: bool,
}

impl FileInfo {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            description: String::new(),
            content: None,
            status: FileStatus::Pending,
            dependencies: Vec::new(),
            needs_update: false,
        }
    }

    /// Builder method to set dependencies
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Builder method to set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder method to pre-supply content
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// File name component of the path (`src/index.ts` -> `index.ts`)
    pub fn file_name(&self) -> &str {
        Path::new(&self.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.path)
    }
}

/// Status of a narrative plan step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Done,
    Skipped,
}

/// A narrative step of the plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,

    #[serde(default)]
    pub status: StepStatus,
}

impl PlanStep {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            status: StepStatus::Pending,
        }
    }
}

/// Technology stack summary, grouped by category (`frontend`, `testing`, ...)
pub type TechnicalStack = BTreeMap<String, Vec<String>>;

/// The deliverable description for one task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub files: Vec<FileInfo>,

    #[serde(default, rename = "technical-stack")]
    pub technical_stack: TechnicalStack,

    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Build a plan, collapsing duplicate paths (a later entry replaces an earlier one)
    pub fn new(files: Vec<FileInfo>) -> Self {
        let mut plan = Self::default();
        for file in files {
            plan.upsert_file(file);
        }
        plan
    }

    /// Re-establish path uniqueness after deserialization
    pub fn normalized(self) -> Self {
        let Plan {
            files,
            technical_stack,
            steps,
        } = self;
        let mut plan = Plan::new(files);
        plan.technical_stack = technical_stack;
        plan.steps = steps;
        plan
    }

    /// Insert a file, replacing any existing entry with the same path in place
    pub fn upsert_file(&mut self, file: FileInfo) {
        match self.files.iter_mut().find(|f| f.path == file.path) {
            Some(existing) => {
                debug!(path = %file.path, "upsert_file: replacing existing entry");
                *existing = file;
            }
            None => self.files.push(file),
        }
    }

    pub fn file(&self, path: &str) -> Option<&FileInfo> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn file_mut(&mut self, path: &str) -> Option<&mut FileInfo> {
        self.files.iter_mut().find(|f| f.path == path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.file(path).is_some()
    }

    /// Mark a file for regeneration; returns false if the path is not planned
    pub fn mark_needs_update(&mut self, path: &str) -> bool {
        match self.file_mut(path) {
            Some(file) => {
                file.needs_update = true;
                true
            }
            None => false,
        }
    }

    /// Files currently marked for regeneration, in plan order
    pub fn files_needing_update(&self) -> Vec<&FileInfo> {
        self.files.iter().filter(|f| f.needs_update).collect()
    }

    /// Count files in the given status
    pub fn count_with_status(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }
}
