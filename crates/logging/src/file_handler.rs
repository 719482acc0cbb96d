//! On-disk task log handler

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use common::error::Result;
use common::models::TaskAttempt;
use common::template::Template;
use common::types::LogLevel;

use crate::formatter::LogFormatter;
use crate::handler::TaskLogSink;
use crate::record::LogRecord;

/// Writes a task attempt's records to `<local_base>/<rendered filename template>`.
///
/// Each record is written with a single unbuffered write so the file can be
/// read back at any point while the handler is open.
#[derive(Debug)]
pub struct FileTaskHandler {
    local_base: PathBuf,
    filename_template: Template,
    formatter: Arc<dyn LogFormatter>,
    level: LogLevel,
    file: Option<File>,
    path: Option<PathBuf>,
}

impl FileTaskHandler {
    /// Creates a handler; a malformed filename template is rejected here
    pub fn new(
        local_base: impl Into<PathBuf>,
        filename_template: &str,
        formatter: Arc<dyn LogFormatter>,
    ) -> Result<Self> {
        Ok(Self {
            local_base: local_base.into(),
            filename_template: Template::parse(filename_template)?,
            formatter,
            level: LogLevel::default(),
            file: None,
            path: None,
        })
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Absolute path of the currently bound log file
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

impl TaskLogSink for FileTaskHandler {
    fn set_context(&mut self, attempt: &TaskAttempt) -> Result<()> {
        let path = self.local_base.join(self.render_filename(attempt)?);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Task log for {} at {}", attempt, path.display());

        self.file = Some(file);
        self.path = Some(path);
        Ok(())
    }

    fn emit(&mut self, record: &LogRecord) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let mut line = self.formatter.format(record);
        line.push('\n');
        if let Err(e) = file.write_all(line.as_bytes()) {
            warn!(error = %e, "failed to write task log record");
        }
    }

    fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Err(e) = file.flush() {
                warn!(error = %e, "failed to flush task log");
            }
        }
    }

    fn level(&self) -> LogLevel {
        self.level
    }

    fn formatter(&self) -> Arc<dyn LogFormatter> {
        self.formatter.clone()
    }

    fn local_base(&self) -> &Path {
        &self.local_base
    }

    fn render_filename(&self, attempt: &TaskAttempt) -> Result<PathBuf> {
        self.filename_template
            .render(|name| attempt.placeholder(name))
            .map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use crate::formatter::TextFormatter;

    fn attempt() -> TaskAttempt {
        TaskAttempt::new("etl", "load", Utc.with_ymd_and_hms(2021, 6, 1, 0, 0, 0).unwrap(), 1)
    }

    fn handler(base: &Path, template: &str) -> FileTaskHandler {
        let formatter = Arc::new(TextFormatter::new("{levelname} {message}").unwrap());
        FileTaskHandler::new(base, template, formatter).unwrap()
    }

    #[test]
    fn test_writes_records_to_rendered_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = handler(dir.path(), "{dag_id}/{task_id}/{execution_date}/{try_number}.log")
            .with_level(LogLevel::Info);

        handler.set_context(&attempt()).unwrap();
        handler.handle(&LogRecord::new(LogLevel::Debug, "airflow.task", "skipped"));
        handler.handle(&LogRecord::new(LogLevel::Info, "airflow.task", "kept"));
        handler.close();

        let path = dir.path().join("etl/load/2021_06_01T00_00_00_000000/1.log");
        assert_eq!(handler.path(), Some(path.as_path()));
        assert!(!handler.is_open());
        assert_eq!(fs::read_to_string(path).unwrap(), "INFO kept\n");
    }

    #[test]
    fn test_unknown_placeholder_fails_bind() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = handler(dir.path(), "{dag_id}/{owner}.log");
        assert!(handler.set_context(&attempt()).unwrap_err().is_template());
        assert!(!handler.is_open());
    }

    #[test]
    fn test_malformed_template_rejected_at_construction() {
        let formatter = Arc::new(TextFormatter::new("{message}").unwrap());
        assert!(FileTaskHandler::new("/tmp", "{dag_id", formatter).is_err());
    }

    #[test]
    fn test_emit_before_bind_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = handler(dir.path(), "{dag_id}.log");
        handler.emit(&LogRecord::new(LogLevel::Error, "airflow.task", "lost"));
        handler.close();
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }
}
