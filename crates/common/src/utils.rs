//! Utility functions for Task Log Tee
//!
//! This module provides utility functions used throughout Task Log Tee.

use std::path::{Path, PathBuf};

/// Splits a comma-separated list of field names, trimming whitespace.
///
/// Order is preserved and empty entries are dropped.
///
/// # Examples
///
/// ```
/// use common::utils::parse_field_list;
///
/// assert_eq!(parse_field_list("dag_id, task_id"), vec!["dag_id", "task_id"]);
/// assert!(parse_field_list(" , ").is_empty());
/// ```
pub fn parse_field_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .collect()
}

/// Expands a leading `~` to the current user's home directory
///
/// Paths without a leading `~`, or when no home directory can be
/// determined, are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Returns the parent directory of a file path, if it has a non-empty one
pub fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|parent| !parent.as_os_str().is_empty())
}
