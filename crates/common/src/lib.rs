//! Common utilities and types for Task Log Tee
//!
//! This crate provides shared functionality used across the workspace,
//! including error types, the task-attempt model, placeholder templates
//! and utility functions.

pub mod error;
pub mod models;
pub mod template;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use error::{Error, Result};
pub use models::*;
pub use template::Template;
pub use types::*;
