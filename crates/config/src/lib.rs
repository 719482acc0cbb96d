//! Logging configuration for Task Log Tee
//!
//! This crate loads logging settings from layered sources and assembles
//! them into an explicit [`LoggingConfig`] once at process start.

pub mod assembler;
pub mod settings;

// Re-export commonly used types
pub use assembler::{
    assemble, manager_logger_enabled_from_env, prepare_directories, FormatterKind, FormatterSpec,
    HandlerSpec, LoggerSpec, LoggingConfig, ProcessorManagerConfig,
};
pub use settings::{CoreSettings, LoggingSettings, SchedulerSettings, StdoutSettings};
