//! Config-first, depth-first ordering over a file graph

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::domain::FileInfo;

/// File names that are always generated before anything else
pub const DEFAULT_CONFIG_FILENAMES: [&str; 5] = ["package.json", "tsconfig.json", ".env", ".env.example", ".gitignore"];

/// Orders files so dependencies come before their dependents
///
/// Cycles never error: a node is marked visited before its dependencies are
/// walked, so the back-edge of a cycle finds it visited and is dropped.
#[derive(Debug, Clone)]
pub struct DependencyScheduler {
    config_filenames: Vec<String>,
}

impl Default for DependencyScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_FILENAMES.iter().map(|s| s.to_string()).collect())
    }
}

impl DependencyScheduler {
    pub fn new(config_filenames: Vec<String>) -> Self {
        Self { config_filenames }
    }

    pub fn config_filenames(&self) -> &[String] {
        &self.config_filenames
    }

    /// Whether the file's basename is a recognized config file name
    pub fn is_config(&self, file: &FileInfo) -> bool {
        let name = file.file_name();
        self.config_filenames.iter().any(|c| c == name)
    }

    /// Generation order as a sequence of references into `files`
    pub fn order<'a>(&self, files: &'a [FileInfo]) -> Vec<&'a FileInfo> {
        self.order_indices(files).into_iter().map(|i| &files[i]).collect()
    }

    /// Generation order as indices into `files`
    ///
    /// The result is always a permutation of `0..files.len()`.
    pub fn order_indices(&self, files: &[FileInfo]) -> Vec<usize> {
        debug!(file_count = files.len(), "order_indices: called");

        // First occurrence wins when a path is listed twice
        let mut index_map: HashMap<&str, usize> = HashMap::with_capacity(files.len());
        for (i, file) in files.iter().enumerate() {
            index_map.entry(file.path.as_str()).or_insert(i);
        }

        let mut visited: HashSet<usize> = HashSet::with_capacity(files.len());
        let mut result = Vec::with_capacity(files.len());

        for (idx, file) in files.iter().enumerate() {
            if self.is_config(file) {
                debug!(path = %file.path, "order_indices: config file first");
                visited.insert(idx);
                result.push(idx);
            }
        }

        for idx in 0..files.len() {
            dfs_visit(idx, files, &index_map, &mut visited, &mut result);
        }

        debug!(result_len = result.len(), "order_indices: complete");
        result
    }
}

/// Explicit-stack DFS; each frame is (file index, next dependency position)
fn dfs_visit(
    root: usize,
    files: &[FileInfo],
    index_map: &HashMap<&str, usize>,
    visited: &mut HashSet<usize>,
    result: &mut Vec<usize>,
) {
    if !visited.insert(root) {
        return;
    }

    let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
    while let Some(frame) = stack.last_mut() {
        let (idx, next_dep) = *frame;
        let deps = &files[idx].dependencies;

        if next_dep < deps.len() {
            frame.1 += 1;
            let dep_path = deps[next_dep].as_str();
            match index_map.get(dep_path) {
                Some(&dep_idx) if visited.insert(dep_idx) => {
                    debug!(idx, dep_idx, %dep_path, "dfs_visit: visiting dependency");
                    stack.push((dep_idx, 0));
                }
                Some(_) => {}
                None => debug!(idx, %dep_path, "dfs_visit: dependency not in file set"),
            }
        } else {
            stack.pop();
            result.push(idx);
        }
    }
}
