//! Logging configuration assembly
//!
//! Turns [`LoggingSettings`] into the static wiring of formatters, handlers
//! and loggers used at process start. The DAG processor manager's rotating
//! log is an optional block, enabled by an environment flag, because
//! initialising that rotating file from several processes at once fails.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use bytesize::ByteSize;
use serde::{Deserialize, Serialize};
use tracing::info;

use common::error::{Error, Result};
use common::types::LogLevel;
use common::utils::{expand_home, parent_dir, parse_field_list};

use crate::settings::LoggingSettings;

/// Environment flag enabling the processor manager logger
pub const MANAGER_LOGGER_ENV: &str = "CONFIG_PROCESSOR_MANAGER_LOGGER";

/// Formatter used by file handlers
pub const FORMATTER_PLAIN: &str = "airflow";
/// Formatter used by the console
pub const FORMATTER_COLOURED: &str = "airflow_coloured";

pub const HANDLER_CONSOLE: &str = "console";
pub const HANDLER_TASK: &str = "task";
pub const HANDLER_PROCESSOR: &str = "processor";
pub const HANDLER_PROCESSOR_MANAGER: &str = "processor_manager";

pub const LOGGER_TASK: &str = "airflow.task";
pub const LOGGER_PROCESSOR: &str = "airflow.processor";
pub const LOGGER_PROCESSOR_MANAGER: &str = "airflow.processor_manager";
pub const LOGGER_FAB: &str = "flask_appbuilder";

/// Size at which the processor manager log rolls over (100 MiB)
pub const MANAGER_LOG_MAX_BYTES: u64 = 100 * 1024 * 1024;
/// Rolled-over processor manager logs kept on disk
pub const MANAGER_LOG_BACKUP_COUNT: usize = 5;

/// Formatter flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatterKind {
    /// Placeholder template rendered as-is
    Plain,
    /// Template with ANSI colour placeholders
    Coloured,
}

/// A named formatter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatterSpec {
    pub kind: FormatterKind,
    pub format: String,
}

/// File open mode for rotating handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileMode {
    Append,
    Truncate,
}

/// A named handler and its parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum HandlerSpec {
    /// Writes to the process's stdout
    Console { formatter: String },
    /// Per-attempt task file, teed to stdout at close
    TeeTask {
        base_log_folder: PathBuf,
        filename_template: String,
        formatter: String,
        json_fields: Vec<String>,
        json_format: bool,
        write_stdout: bool,
    },
    /// Per-file DAG processor logs, provided by the host scheduler
    FileProcessor {
        base_log_folder: PathBuf,
        filename_template: String,
        formatter: String,
    },
    /// Size-rotated file
    RotatingFile {
        filename: PathBuf,
        formatter: String,
        max_bytes: u64,
        backup_count: usize,
        mode: FileMode,
    },
}

impl HandlerSpec {
    /// Name of the formatter this handler uses
    pub fn formatter(&self) -> &str {
        match self {
            HandlerSpec::Console { formatter }
            | HandlerSpec::TeeTask { formatter, .. }
            | HandlerSpec::FileProcessor { formatter, .. }
            | HandlerSpec::RotatingFile { formatter, .. } => formatter,
        }
    }
}

/// Logger wiring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerSpec {
    pub handlers: Vec<String>,
    pub level: LogLevel,
    pub propagate: bool,
}

/// The optional processor manager block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorManagerConfig {
    pub handler: HandlerSpec,
    pub logger: LoggerSpec,
}

impl ProcessorManagerConfig {
    /// Path of the rotating log file
    pub fn filename(&self) -> Option<&Path> {
        match &self.handler {
            HandlerSpec::RotatingFile { filename, .. } => Some(filename),
            _ => None,
        }
    }
}

/// Fully assembled logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub version: u32,
    pub disable_existing_loggers: bool,
    pub formatters: BTreeMap<String, FormatterSpec>,
    pub handlers: BTreeMap<String, HandlerSpec>,
    pub loggers: BTreeMap<String, LoggerSpec>,
    pub root: LoggerSpec,
    pub processor_manager: Option<ProcessorManagerConfig>,
}

impl LoggingConfig {
    /// Handlers including the processor manager handler when enabled
    pub fn handlers_with_manager(&self) -> BTreeMap<String, HandlerSpec> {
        let mut handlers = self.handlers.clone();
        if let Some(manager) = &self.processor_manager {
            handlers.insert(HANDLER_PROCESSOR_MANAGER.to_string(), manager.handler.clone());
        }
        handlers
    }

    /// Loggers including the processor manager logger when enabled
    pub fn loggers_with_manager(&self) -> BTreeMap<String, LoggerSpec> {
        let mut loggers = self.loggers.clone();
        if let Some(manager) = &self.processor_manager {
            loggers.insert(LOGGER_PROCESSOR_MANAGER.to_string(), manager.logger.clone());
        }
        loggers
    }

    /// Looks up a formatter by name
    pub fn formatter(&self, name: &str) -> Result<&FormatterSpec> {
        self.formatters
            .get(name)
            .ok_or_else(|| Error::Config(format!("unknown formatter `{}`", name)))
    }

    /// Looks up a handler by name, including the processor manager handler
    pub fn handler(&self, name: &str) -> Result<&HandlerSpec> {
        if name == HANDLER_PROCESSOR_MANAGER {
            if let Some(manager) = &self.processor_manager {
                return Ok(&manager.handler);
            }
        }
        self.handlers
            .get(name)
            .ok_or_else(|| Error::Config(format!("unknown handler `{}`", name)))
    }

    /// Looks up a logger by name, including the processor manager logger
    pub fn logger(&self, name: &str) -> Option<&LoggerSpec> {
        if name == LOGGER_PROCESSOR_MANAGER {
            return self.processor_manager.as_ref().map(|manager| &manager.logger);
        }
        self.loggers.get(name)
    }

    /// Serializes the configuration as pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// True when the processor manager logger should be configured
pub fn manager_logger_enabled_from_env() -> bool {
    std::env::var(MANAGER_LOGGER_ENV).map_or(false, |value| value == "True")
}

fn parse_level(value: &str) -> Result<LogLevel> {
    value.parse::<LogLevel>().map_err(Error::Config)
}

/// Assembles the logging configuration.
///
/// This is a pure function of its inputs; see [`prepare_directories`] for
/// the filesystem side effect of enabling the processor manager logger.
pub fn assemble(settings: &LoggingSettings, manager_logger_enabled: bool) -> Result<LoggingConfig> {
    let core = &settings.core;
    let log_level = parse_level(&core.logging_level)?;
    let fab_log_level = parse_level(&core.fab_logging_level)?;

    let mut formatters = BTreeMap::new();
    formatters.insert(
        FORMATTER_PLAIN.to_string(),
        FormatterSpec {
            kind: FormatterKind::Plain,
            format: core.log_format.clone(),
        },
    );
    formatters.insert(
        FORMATTER_COLOURED.to_string(),
        if core.colored_console_log {
            FormatterSpec {
                kind: FormatterKind::Coloured,
                format: core.colored_log_format.clone(),
            }
        } else {
            FormatterSpec {
                kind: FormatterKind::Plain,
                format: core.log_format.clone(),
            }
        },
    );

    let mut handlers = BTreeMap::new();
    handlers.insert(
        HANDLER_CONSOLE.to_string(),
        HandlerSpec::Console {
            formatter: FORMATTER_COLOURED.to_string(),
        },
    );
    handlers.insert(
        HANDLER_TASK.to_string(),
        HandlerSpec::TeeTask {
            base_log_folder: expand_home(&core.base_log_folder),
            filename_template: core.log_filename_template.clone(),
            formatter: FORMATTER_PLAIN.to_string(),
            json_fields: parse_field_list(&settings.stdout.json_fields),
            json_format: settings.stdout.json_format,
            write_stdout: settings.stdout.write_stdout,
        },
    );
    handlers.insert(
        HANDLER_PROCESSOR.to_string(),
        HandlerSpec::FileProcessor {
            base_log_folder: expand_home(&settings.scheduler.child_process_log_directory),
            filename_template: core.log_processor_filename_template.clone(),
            formatter: FORMATTER_PLAIN.to_string(),
        },
    );

    let mut loggers = BTreeMap::new();
    loggers.insert(
        LOGGER_PROCESSOR.to_string(),
        LoggerSpec {
            handlers: vec![HANDLER_PROCESSOR.to_string()],
            level: log_level,
            propagate: false,
        },
    );
    loggers.insert(
        LOGGER_TASK.to_string(),
        LoggerSpec {
            handlers: vec![HANDLER_TASK.to_string()],
            level: log_level,
            propagate: false,
        },
    );
    loggers.insert(
        LOGGER_FAB.to_string(),
        LoggerSpec {
            handlers: vec![HANDLER_CONSOLE.to_string()],
            level: fab_log_level,
            propagate: true,
        },
    );

    let processor_manager = manager_logger_enabled.then(|| ProcessorManagerConfig {
        handler: HandlerSpec::RotatingFile {
            filename: expand_home(&core.dag_processor_manager_log_location),
            formatter: FORMATTER_PLAIN.to_string(),
            max_bytes: MANAGER_LOG_MAX_BYTES,
            backup_count: MANAGER_LOG_BACKUP_COUNT,
            mode: FileMode::Append,
        },
        logger: LoggerSpec {
            handlers: vec![HANDLER_PROCESSOR_MANAGER.to_string()],
            level: log_level,
            propagate: false,
        },
    });

    Ok(LoggingConfig {
        version: 1,
        disable_existing_loggers: false,
        formatters,
        handlers,
        loggers,
        root: LoggerSpec {
            handlers: vec![HANDLER_CONSOLE.to_string()],
            level: log_level,
            propagate: false,
        },
        processor_manager,
    })
}

/// Creates the processor manager log directory (mode 0755) when that logger is enabled.
///
/// The rotating file writer only creates the file, not its directory.
pub fn prepare_directories(config: &LoggingConfig) -> Result<()> {
    let Some(filename) = config.processor_manager.as_ref().and_then(|m| m.filename()) else {
        return Ok(());
    };
    let Some(directory) = parent_dir(filename) else {
        return Ok(());
    };
    if directory.is_dir() {
        return Ok(());
    }

    create_dir_all_mode(directory)?;
    info!(
        "Created processor manager log directory {} (rotating at {}, {} backups)",
        directory.display(),
        ByteSize(MANAGER_LOG_MAX_BYTES),
        MANAGER_LOG_BACKUP_COUNT
    );
    Ok(())
}

#[cfg(unix)]
fn create_dir_all_mode(directory: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(directory)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_dir_all_mode(directory: &Path) -> Result<()> {
    std::fs::create_dir_all(directory)?;
    Ok(())
}
