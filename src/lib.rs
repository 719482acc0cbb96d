//! Main integration module for Task Log Tee
//!
//! This module wires the configuration assembler to the logging crate and
//! provides the entry points used by the binary: load and assemble the
//! logging configuration, install the subscriber, and run a task attempt
//! under the tee task handler.

use std::path::Path;
use anyhow::{Context, Result};
use tracing::{debug, info};

use common::models::TaskAttempt;
use log_config::assembler::LOGGER_TASK;
use log_config::{assemble, manager_logger_enabled_from_env, prepare_directories, LoggingConfig, LoggingSettings};
use logging::{init_logging, LoggingGuard, StdoutRouter, TaskHandlerHandle};

pub use common;
pub use log_config;
pub use logging;

/// Process-wide logging state
pub struct LoggingRuntime {
    /// Assembled configuration
    config: LoggingConfig,

    /// Stdout captured at startup
    stdout: StdoutRouter,

    /// Installed subscriber state
    guard: LoggingGuard,
}

impl LoggingRuntime {
    /// Loads settings and assembles the logging configuration
    pub fn load_config(path: Option<&Path>) -> Result<LoggingConfig> {
        let settings = LoggingSettings::load(path).context("failed to load logging settings")?;
        assemble(&settings, manager_logger_enabled_from_env()).context("failed to assemble logging configuration")
    }

    /// Loads the configuration and installs the global subscriber
    pub fn init(path: Option<&Path>) -> Result<Self> {
        let config = Self::load_config(path)?;
        prepare_directories(&config).context("failed to create log directories")?;

        let stdout = StdoutRouter::capture();
        let guard = init_logging(&config, stdout.clone()).context("failed to initialise logging")?;
        info!(
            "Logging initialised (processor manager log {})",
            if config.processor_manager.is_some() { "enabled" } else { "disabled" }
        );

        Ok(Self { config, stdout, guard })
    }

    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }

    pub fn stdout(&self) -> &StdoutRouter {
        &self.stdout
    }

    /// The shared task handler
    pub fn task_handler(&self) -> Result<&TaskHandlerHandle> {
        self.guard
            .task_handler()
            .context("no task handler is configured")
    }
}

/// Runs one task attempt: binds the handler, logs `messages` on the task
/// target and closes the handler, teeing the log to stdout if enabled.
pub fn run_task_attempt(handler: &TaskHandlerHandle, attempt: &TaskAttempt, messages: &[String]) -> Result<()> {
    handler
        .set_context(attempt)
        .with_context(|| format!("failed to bind task log for {}", attempt))?;
    debug!("Running {}", attempt);

    for message in messages {
        info!(target: LOGGER_TASK, "{}", message);
    }

    handler.close();
    Ok(())
}
