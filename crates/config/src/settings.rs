//! Logging settings
//!
//! Settings are layered: built-in defaults, then an optional configuration
//! file, then `AIRFLOW__<SECTION>__<KEY>` environment variables.

use std::path::Path;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use config::builder::DefaultState;
use serde::{Deserialize, Serialize};
use tracing::debug;

use common::error::{Error, Result};

/// Environment variable prefix for settings overrides
pub const ENV_PREFIX: &str = "AIRFLOW";

/// Separator between prefix, section and key in environment variables
pub const ENV_SEPARATOR: &str = "__";

/// `[core]` logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreSettings {
    pub logging_level: String,
    /// Level for the web UI framework logger, which is very verbose at INFO
    pub fab_logging_level: String,
    pub log_format: String,
    pub colored_log_format: String,
    pub colored_console_log: bool,
    pub base_log_folder: String,
    pub dag_processor_manager_log_location: String,
    pub log_filename_template: String,
    pub log_processor_filename_template: String,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            logging_level: "INFO".to_string(),
            fab_logging_level: "WARN".to_string(),
            log_format: "[{asctime}] {{{filename}:{lineno}}} {levelname} - {message}".to_string(),
            colored_log_format: "[{blue}{asctime}{reset}] {{{blue}{filename}:{reset}{lineno}}} \
                {log_color}{levelname}{reset} - {log_color}{message}{reset}"
                .to_string(),
            colored_console_log: true,
            base_log_folder: "~/airflow/logs".to_string(),
            dag_processor_manager_log_location:
                "~/airflow/logs/dag_processor_manager/dag_processor_manager.log".to_string(),
            log_filename_template: "{dag_id}/{task_id}/{execution_date}/{try_number}.log"
                .to_string(),
            log_processor_filename_template: "{filename}.log".to_string(),
        }
    }
}

/// `[scheduler]` settings relevant to logging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub child_process_log_directory: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            child_process_log_directory: "~/airflow/logs/scheduler".to_string(),
        }
    }
}

/// `[stdout]` settings for the tee task handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StdoutSettings {
    /// Tee each finished task log to stdout
    pub write_stdout: bool,
    /// Emit the tee as JSON instead of plain text
    pub json_format: bool,
    /// Comma-separated field names for the JSON envelope
    pub json_fields: String,
}

impl Default for StdoutSettings {
    fn default() -> Self {
        Self {
            write_stdout: false,
            json_format: false,
            json_fields: "asctime, filename, lineno, levelname, message".to_string(),
        }
    }
}

/// All settings the logging configuration is assembled from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub core: CoreSettings,
    pub scheduler: SchedulerSettings,
    pub stdout: StdoutSettings,
}

impl LoggingSettings {
    /// Loads settings from defaults, an optional file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!("Loading logging settings from {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }
        Self::build(builder.add_source(Self::environment()))
    }

    /// Loads settings from an in-memory document, ignoring the environment
    pub fn from_document(contents: &str, format: FileFormat) -> Result<Self> {
        Self::build(Config::builder().add_source(File::from_str(contents, format)))
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        builder
            .build()
            .and_then(|config| config.try_deserialize::<Self>())
            .map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = LoggingSettings::default();
        assert_eq!(settings.core.logging_level, "INFO");
        assert!(!settings.stdout.write_stdout);
        assert_eq!(
            settings.core.log_filename_template,
            "{dag_id}/{task_id}/{execution_date}/{try_number}.log"
        );
    }

    #[test]
    fn test_from_toml_overrides_only_given_keys() {
        let settings = LoggingSettings::from_document(
            r#"
            [core]
            logging_level = "debug"
            base_log_folder = "/var/log/tasks"

            [stdout]
            write_stdout = true
            json_format = true
            json_fields = "dag_id, task_id"
            "#,
            FileFormat::Toml,
        )
        .unwrap();

        assert_eq!(settings.core.logging_level, "debug");
        assert_eq!(settings.core.base_log_folder, "/var/log/tasks");
        assert_eq!(settings.core.fab_logging_level, "WARN");
        assert!(settings.stdout.write_stdout);
        assert!(settings.stdout.json_format);
        assert_eq!(settings.stdout.json_fields, "dag_id, task_id");
        assert_eq!(settings.scheduler, SchedulerSettings::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[scheduler]\nchild_process_log_directory = \"/tmp/sched\"").unwrap();

        let settings = LoggingSettings::load(Some(file.path())).unwrap();
        assert_eq!(settings.scheduler.child_process_log_directory, "/tmp/sched");
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = LoggingSettings::load(Some(Path::new("/nonexistent/airflow.toml"))).unwrap_err();
        assert!(err.is_config());
    }
}
