//! Tee task log handler
//!
//! Wraps a [`TaskLogSink`] and, when `write_stdout` is enabled, writes the
//! whole task log to the original process stdout once the attempt is done.
//! Nothing is teed per record; the file is read back in full at close.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use common::error::{Error, Result};
use common::models::TaskAttempt;
use common::types::LogLevel;
use common::utils::parse_field_list;
use log_config::assembler::LOGGER_TASK;

use crate::file_handler::FileTaskHandler;
use crate::formatter::{JsonFormatter, LogFormatter};
use crate::handler::TaskLogSink;
use crate::record::LogRecord;
use crate::stream::{StdoutRouter, StreamHandler};

/// Header prepended to the teed log content
pub const TASK_LOG_MARKER: &str = "*TASK_LOG*\n\n";
/// Field on the teed record holding the file that was read
pub const LOG_PATH_FIELD: &str = "log_path";
/// Extra field marking records as emitted by a DAG task
pub const ORIGIN_MARKER_FIELD: &str = "is_airflow_dag";

/// Lifecycle of a tee handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Unbound,
    Bound,
    Closed,
}

/// Task handler that tees the finished task log to stdout
#[derive(Debug)]
pub struct TeeFileTaskHandler<S: TaskLogSink = FileTaskHandler> {
    inner: S,
    stdout: StdoutRouter,
    write_stdout: bool,
    json_format: bool,
    json_fields: Vec<String>,
    log_relative_path: Option<PathBuf>,
    mark_end_on_close: bool,
    stream_handler: Option<StreamHandler>,
    closed: bool,
}

impl<S: TaskLogSink> TeeFileTaskHandler<S> {
    /// Wraps `inner`; `json_fields` is a comma-separated list of field names
    pub fn new(
        inner: S,
        stdout: StdoutRouter,
        write_stdout: bool,
        json_format: bool,
        json_fields: &str,
    ) -> Self {
        Self::with_fields(inner, stdout, write_stdout, json_format, parse_field_list(json_fields))
    }

    /// Wraps `inner` with an already parsed field list
    pub fn with_fields(
        inner: S,
        stdout: StdoutRouter,
        write_stdout: bool,
        json_format: bool,
        json_fields: Vec<String>,
    ) -> Self {
        Self {
            inner,
            stdout,
            write_stdout,
            json_format,
            json_fields,
            log_relative_path: None,
            mark_end_on_close: true,
            stream_handler: None,
            closed: false,
        }
    }

    pub fn state(&self) -> HandlerState {
        if self.closed {
            HandlerState::Closed
        } else if self.log_relative_path.is_some() {
            HandlerState::Bound
        } else {
            HandlerState::Unbound
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn write_stdout(&self) -> bool {
        self.write_stdout
    }

    pub fn json_format(&self) -> bool {
        self.json_format
    }

    pub fn json_fields(&self) -> &[String] {
        &self.json_fields
    }

    pub fn log_relative_path(&self) -> Option<&Path> {
        self.log_relative_path.as_deref()
    }

    pub fn mark_end_on_close(&self) -> bool {
        self.mark_end_on_close
    }

    pub fn stream_handler(&self) -> Option<&StreamHandler> {
        self.stream_handler.as_ref()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Absolute path of the bound task log
    pub fn absolute_log_path(&self) -> Option<PathBuf> {
        self.log_relative_path
            .as_ref()
            .map(|relative| self.inner.local_base().join(relative))
    }

    fn stdout_formatter(&self, attempt: &TaskAttempt) -> Result<Arc<dyn LogFormatter>> {
        let formatter = self.inner.formatter();
        if !self.json_format || attempt.raw {
            return Ok(formatter);
        }

        let format = formatter.template().unwrap_or("{message}").to_string();
        let extras = vec![
            ("dag_id".to_string(), attempt.dag_id.clone()),
            ("task_id".to_string(), attempt.task_id.clone()),
            ("execution_date".to_string(), attempt.clean_execution_date()),
            ("try_number".to_string(), attempt.try_number.to_string()),
            (ORIGIN_MARKER_FIELD.to_string(), "true".to_string()),
        ];
        Ok(Arc::new(JsonFormatter::new(&format, self.json_fields.clone(), extras)?))
    }

    fn write_task_to_stdout(&mut self) {
        let Some(absolute_path) = self.absolute_log_path() else {
            return;
        };
        let Some(stream_handler) = self.stream_handler.as_mut() else {
            return;
        };

        let contents = match std::fs::read_to_string(&absolute_path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(
                    path = %absolute_path.display(),
                    error = %e,
                    "could not read task log for stdout, emitting marker only"
                );
                String::new()
            }
        };

        let record = LogRecord::new(
            LogLevel::Info,
            LOGGER_TASK,
            format!("{}{}", TASK_LOG_MARKER, contents),
        )
        .with_field(LOG_PATH_FIELD, absolute_path.display().to_string());
        stream_handler.emit(&record);
    }
}

impl<S: TaskLogSink> TaskLogSink for TeeFileTaskHandler<S> {
    fn set_context(&mut self, attempt: &TaskAttempt) -> Result<()> {
        if self.state() != HandlerState::Unbound {
            return Err(Error::InvalidArgument(format!(
                "task handler is already {:?}; cannot bind {}",
                self.state(),
                attempt
            )));
        }

        self.inner.set_context(attempt)?;
        let relative = self.inner.render_filename(attempt)?;
        self.mark_end_on_close = !attempt.raw;

        if self.write_stdout {
            let formatter = self.stdout_formatter(attempt)?;
            self.stream_handler = Some(StreamHandler::new(
                self.stdout.original(),
                self.inner.level(),
                formatter,
            ));
        }
        debug!("Bound task handler to {} ({})", attempt, relative.display());
        self.log_relative_path = Some(relative);
        Ok(())
    }

    fn emit(&mut self, record: &LogRecord) {
        if !self.closed {
            self.inner.emit(record);
        }
    }

    /// Finalizes the attempt's log. Safe to call any number of times and
    /// never fails: read errors only degrade the teed output.
    fn close(&mut self) {
        if self.closed {
            return;
        }

        if !self.mark_end_on_close {
            self.closed = true;
            return;
        }

        if self.log_relative_path.is_none() {
            self.closed = true;
            return;
        }

        if self.write_stdout {
            self.write_task_to_stdout();
            if let Some(mut stream_handler) = self.stream_handler.take() {
                stream_handler.close();
            }
            self.stdout.restore();
        }

        self.inner.close();
        self.closed = true;
    }

    fn level(&self) -> LogLevel {
        self.inner.level()
    }

    fn formatter(&self) -> Arc<dyn LogFormatter> {
        self.inner.formatter()
    }

    fn local_base(&self) -> &Path {
        self.inner.local_base()
    }

    fn render_filename(&self, attempt: &TaskAttempt) -> Result<PathBuf> {
        self.inner.render_filename(attempt)
    }
}

impl<S: TaskLogSink> Drop for TeeFileTaskHandler<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use serde_json::Value;
    use crate::formatter::TextFormatter;
    use crate::stream::CaptureBuffer;

    /// Records lifecycle calls made on the wrapped file handler
    #[derive(Debug)]
    struct SpySink {
        inner: FileTaskHandler,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl TaskLogSink for SpySink {
        fn set_context(&mut self, attempt: &TaskAttempt) -> Result<()> {
            self.calls.lock().push("set_context");
            self.inner.set_context(attempt)
        }

        fn emit(&mut self, record: &LogRecord) {
            self.inner.emit(record)
        }

        fn close(&mut self) {
            self.calls.lock().push("close");
            self.inner.close()
        }

        fn level(&self) -> LogLevel {
            self.inner.level()
        }

        fn formatter(&self) -> Arc<dyn LogFormatter> {
            self.inner.formatter()
        }

        fn local_base(&self) -> &Path {
            self.inner.local_base()
        }

        fn render_filename(&self, attempt: &TaskAttempt) -> Result<PathBuf> {
            self.inner.render_filename(attempt)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        stdout: CaptureBuffer,
        router: StdoutRouter,
        calls: Arc<Mutex<Vec<&'static str>>>,
        handler: TeeFileTaskHandler<SpySink>,
    }

    fn fixture(write_stdout: bool, json_format: bool, json_fields: &str) -> Fixture {
        fixture_with_format("{message}", write_stdout, json_format, json_fields)
    }

    fn fixture_with_format(format: &str, write_stdout: bool, json_format: bool, json_fields: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let stdout = CaptureBuffer::default();
        let router = StdoutRouter::from_writer(stdout.clone());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let formatter = Arc::new(TextFormatter::new(format).unwrap());
        let inner = FileTaskHandler::new(dir.path(), "{dag_id}/{task_id}/{try_number}.log", formatter)
            .unwrap()
            .with_level(LogLevel::Info);
        let handler = TeeFileTaskHandler::new(
            SpySink { inner, calls: calls.clone() },
            router.clone(),
            write_stdout,
            json_format,
            json_fields,
        );
        Fixture { _dir: dir, stdout, router, calls, handler }
    }

    fn attempt() -> TaskAttempt {
        let date = Utc.with_ymd_and_hms(2019, 3, 7, 14, 5, 9).unwrap();
        TaskAttempt::new("example_dag", "print_date", date, 1)
    }

    fn log(handler: &mut TeeFileTaskHandler<SpySink>, message: &str) {
        handler.handle(&LogRecord::new(LogLevel::Info, LOGGER_TASK, message));
    }

    #[test]
    fn test_parses_json_fields() {
        let fx = fixture(true, true, " dag_id ,task_id,, ");
        assert_eq!(fx.handler.json_fields(), ["dag_id".to_string(), "task_id".to_string()]);
        assert_eq!(fx.handler.state(), HandlerState::Unbound);
    }

    #[test]
    fn test_close_tees_whole_log_once() {
        let mut fx = fixture(true, false, "");
        fx.handler.set_context(&attempt()).unwrap();
        assert_eq!(fx.handler.state(), HandlerState::Bound);
        assert_eq!(
            fx.handler.log_relative_path(),
            Some(Path::new("example_dag/print_date/1.log"))
        );
        assert!(fx.handler.mark_end_on_close());

        log(&mut fx.handler, "first");
        log(&mut fx.handler, "second");
        assert_eq!(fx.stdout.contents(), "", "nothing is teed per record");

        fx.handler.close();
        assert_eq!(fx.stdout.contents(), "*TASK_LOG*\n\nfirst\nsecond\n\n");
        assert!(fx.handler.is_closed());
        assert!(fx.handler.stream_handler().is_none());
        assert_eq!(*fx.calls.lock(), vec!["set_context", "close"]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut fx = fixture(true, false, "");
        fx.handler.set_context(&attempt()).unwrap();
        log(&mut fx.handler, "only once");

        fx.handler.close();
        let after_first = fx.stdout.contents();
        fx.handler.close();
        fx.handler.close();

        assert_eq!(fx.stdout.contents(), after_first);
        assert_eq!(after_first.matches(TASK_LOG_MARKER).count(), 1);
        assert_eq!(*fx.calls.lock(), vec!["set_context", "close"]);
    }

    #[test]
    fn test_raw_attempt_skips_finalization() {
        let mut fx = fixture(true, true, "dag_id");
        fx.handler.set_context(&attempt().with_raw(true)).unwrap();
        assert!(!fx.handler.mark_end_on_close());
        log(&mut fx.handler, "raw output");

        fx.handler.close();
        fx.handler.close();

        assert!(fx.handler.is_closed());
        assert_eq!(fx.stdout.contents(), "");
        assert_eq!(*fx.calls.lock(), vec!["set_context"]);
    }

    #[test]
    fn test_raw_attempt_uses_primary_formatter() {
        let mut fx = fixture(true, true, "dag_id");
        fx.handler.set_context(&attempt().with_raw(true)).unwrap();
        let stream = fx.handler.stream_handler().unwrap();
        assert_eq!(stream.formatter().template(), Some("{message}"));
        assert_eq!(stream.level(), LogLevel::Info);
    }

    #[test]
    fn test_close_without_bind() {
        let mut fx = fixture(true, true, "dag_id");
        fx.handler.close();

        assert!(fx.handler.is_closed());
        assert_eq!(fx.handler.state(), HandlerState::Closed);
        assert_eq!(fx.stdout.contents(), "");
        assert!(fx.calls.lock().is_empty());
    }

    #[test]
    fn test_missing_file_emits_marker_only() {
        let mut fx = fixture(true, false, "");
        fx.handler.set_context(&attempt()).unwrap();
        log(&mut fx.handler, "will be deleted");
        std::fs::remove_file(fx.handler.absolute_log_path().unwrap()).unwrap();

        fx.handler.close();

        assert_eq!(fx.stdout.contents(), format!("{}\n", TASK_LOG_MARKER));
        assert!(fx.handler.is_closed());
    }

    #[test]
    fn test_json_envelope() {
        let mut fx = fixture(true, true, "dag_id, task_id, message");
        fx.handler.set_context(&attempt()).unwrap();
        log(&mut fx.handler, "hello");
        fx.handler.close();

        let output = fx.stdout.contents();
        assert_eq!(output.lines().count(), 1);
        let json: serde_json::Map<String, Value> = serde_json::from_str(output.trim_end()).unwrap();

        let keys: Vec<&str> = json.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["dag_id", "task_id", "message", "execution_date", "try_number", "is_airflow_dag"]
        );
        assert_eq!(json["dag_id"], "example_dag");
        assert_eq!(json["task_id"], "print_date");
        assert_eq!(json["execution_date"], "2019_03_07T14_05_09_000000");
        assert_eq!(json["try_number"], "1");
        assert_eq!(json["is_airflow_dag"], "true");
        assert_eq!(json["message"], "*TASK_LOG*\n\nhello\n");
    }

    #[test]
    fn test_json_envelope_holds_only_configured_fields_and_extras() {
        let mut fx = fixture(true, true, "dag_id, task_id");
        fx.handler.set_context(&attempt()).unwrap();
        log(&mut fx.handler, "hello");
        fx.handler.close();

        let json: serde_json::Map<String, Value> = serde_json::from_str(fx.stdout.contents().trim_end()).unwrap();
        let keys: Vec<&str> = json.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["dag_id", "task_id", "execution_date", "try_number", "is_airflow_dag"]
        );
    }

    #[test]
    fn test_json_message_ignores_primary_format() {
        let mut fx = fixture_with_format(
            "[{asctime}] {{{filename}:{lineno}}} {levelname} - {message}",
            true,
            true,
            "asctime, filename, lineno, levelname, message",
        );
        fx.handler.set_context(&attempt()).unwrap();
        log(&mut fx.handler, "hello");
        let file_line = std::fs::read_to_string(fx.handler.absolute_log_path().unwrap()).unwrap();
        fx.handler.close();

        let json: serde_json::Map<String, Value> = serde_json::from_str(fx.stdout.contents().trim_end()).unwrap();
        assert_eq!(json["message"], format!("*TASK_LOG*\n\n{}", file_line));
        assert_eq!(json["levelname"], "INFO");
        assert_eq!(json["lineno"], Value::Null);
        assert!(file_line.ends_with("INFO - hello\n"));
    }

    #[test]
    fn test_teed_record_carries_log_path() {
        let mut fx = fixture(true, true, "log_path");
        fx.handler.set_context(&attempt()).unwrap();
        let expected = fx.handler.absolute_log_path().unwrap();
        fx.handler.close();

        let json: Value = serde_json::from_str(fx.stdout.contents().trim_end()).unwrap();
        assert_eq!(json["log_path"], expected.display().to_string());
    }

    #[test]
    fn test_write_stdout_disabled() {
        let mut fx = fixture(false, true, "dag_id");
        fx.handler.set_context(&attempt()).unwrap();
        assert!(fx.handler.stream_handler().is_none());
        log(&mut fx.handler, "file only");
        fx.handler.close();

        assert_eq!(fx.stdout.contents(), "");
        assert_eq!(*fx.calls.lock(), vec!["set_context", "close"]);
        let written = std::fs::read_to_string(fx.handler.absolute_log_path().unwrap()).unwrap();
        assert_eq!(written, "file only\n");
    }

    #[test]
    fn test_tee_bypasses_redirected_stdout_and_restores_it() {
        let mut fx = fixture(true, false, "");
        let captured = CaptureBuffer::default();
        fx.router.redirect(captured.clone());

        fx.handler.set_context(&attempt()).unwrap();
        log(&mut fx.handler, "to original");
        fx.handler.close();

        assert!(!fx.router.is_redirected());
        assert_eq!(captured.contents(), "");
        assert!(fx.stdout.contents().starts_with(TASK_LOG_MARKER));
    }

    #[test]
    fn test_bind_twice_is_rejected() {
        let mut fx = fixture(true, false, "");
        fx.handler.set_context(&attempt()).unwrap();
        assert!(fx.handler.set_context(&attempt()).is_err());
        fx.handler.close();
        assert!(fx.handler.set_context(&attempt()).is_err());
    }

    #[test]
    fn test_template_fault_fails_bind() {
        let dir = tempfile::tempdir().unwrap();
        let formatter = Arc::new(TextFormatter::new("{message}").unwrap());
        let inner = FileTaskHandler::new(dir.path(), "{dag_id}/{owner}.log", formatter).unwrap();
        let mut handler =
            TeeFileTaskHandler::new(inner, StdoutRouter::from_writer(CaptureBuffer::default()), true, false, "");

        assert!(handler.set_context(&attempt()).unwrap_err().is_template());
        assert_eq!(handler.state(), HandlerState::Unbound);
        handler.close();
        assert!(handler.is_closed());
    }

    #[test]
    fn test_drop_closes() {
        let fx = fixture(true, false, "");
        let Fixture { _dir, stdout, mut handler, .. } = fx;
        handler.set_context(&attempt()).unwrap();
        log(&mut handler, "flushed on drop");
        drop(handler);
        assert!(stdout.contents().starts_with(TASK_LOG_MARKER));
    }
}
