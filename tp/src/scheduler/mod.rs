//! Dependency scheduler for file generation
//!
//! Computes the linear order files are generated in: recognized config files
//! first, then a depth-first walk of the dependency graph.

mod order;

pub use order::{DEFAULT_CONFIG_FILENAMES, DependencyScheduler};
