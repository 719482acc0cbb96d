//! `tracing` layers
//!
//! Bridges `tracing` events into [`LogRecord`]s and routes them to the
//! configured handlers: the console, the shared task handler, per-file
//! processor logs and the rotating processor manager log.

use std::fmt::{self, Debug};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context, Layer};

use common::error::Result;
use common::models::TaskAttempt;
use common::template::Template;
use common::types::LogLevel;

use crate::formatter::LogFormatter;
use crate::handler::TaskLogSink;
use crate::record::LogRecord;
use crate::tee::{HandlerState, TeeFileTaskHandler};

/// Event field naming the DAG file a processor event belongs to
pub const DAG_FILE_FIELD: &str = "dag_file";

#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push((field.name().to_string(), format!("{:?}", value)));
        }
    }
}

/// Converts a `tracing` event into a log record
pub fn record_from_event(event: &Event<'_>) -> LogRecord {
    let metadata = event.metadata();
    let mut visitor = RecordVisitor::default();
    event.record(&mut visitor);

    let filename = metadata
        .file()
        .and_then(|file| Path::new(file).file_name())
        .and_then(|name| name.to_str());
    let mut record = LogRecord::new(
        LogLevel::from_tracing(metadata.level()),
        metadata.target(),
        visitor.message,
    )
    .with_location(filename, metadata.line());
    record.fields = visitor.fields;
    record
}

/// Shared, lockable task handler
#[derive(Clone, Debug)]
pub struct TaskHandlerHandle(Arc<Mutex<TeeFileTaskHandler>>);

impl TaskHandlerHandle {
    pub fn new(handler: TeeFileTaskHandler) -> Self {
        Self(Arc::new(Mutex::new(handler)))
    }

    /// Binds the handler to an attempt
    pub fn set_context(&self, attempt: &TaskAttempt) -> Result<()> {
        self.0.lock().set_context(attempt)
    }

    /// Closes the handler; repeated calls are no-ops
    pub fn close(&self) {
        self.0.lock().close();
    }

    pub fn state(&self) -> HandlerState {
        self.0.lock().state()
    }

    /// Runs `f` with exclusive access to the handler
    pub fn with<R>(&self, f: impl FnOnce(&mut TeeFileTaskHandler) -> R) -> R {
        f(&mut self.0.lock())
    }
}

/// Forwards events to the shared task handler
#[derive(Clone, Debug)]
pub struct TaskLogLayer {
    handler: TaskHandlerHandle,
}

impl TaskLogLayer {
    pub fn new(handler: TaskHandlerHandle) -> Self {
        Self { handler }
    }
}

impl<S: Subscriber> Layer<S> for TaskLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let record = record_from_event(event);
        self.handler.with(|handler| handler.handle(&record));
    }
}

/// Formats events with a [`LogFormatter`] and writes them to a [`MakeWriter`]
pub struct RecordLayer<W> {
    formatter: Arc<dyn LogFormatter>,
    make_writer: W,
}

impl<W> RecordLayer<W> {
    pub fn new(formatter: Arc<dyn LogFormatter>, make_writer: W) -> Self {
        Self {
            formatter,
            make_writer,
        }
    }
}

impl<W> fmt::Debug for RecordLayer<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordLayer")
            .field("formatter", &self.formatter)
            .finish_non_exhaustive()
    }
}

impl<S, W> Layer<S> for RecordLayer<W>
where
    S: Subscriber,
    W: for<'w> MakeWriter<'w> + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let record = record_from_event(event);
        let mut line = self.formatter.format(&record);
        line.push('\n');
        let _ = self.make_writer.make_writer().write_all(line.as_bytes());
    }
}

/// Appends DAG processor events to `<base>/<YYYY-MM-DD>/<rendered template>`.
///
/// The template's `{filename}` placeholder is the file name of the event's
/// `dag_file` field; events without one go to `scheduler`. Each event opens,
/// appends and closes the file.
pub struct ProcessorFileLayer {
    base_log_folder: PathBuf,
    filename_template: Template,
    formatter: Arc<dyn LogFormatter>,
}

impl ProcessorFileLayer {
    pub fn new(
        base_log_folder: impl Into<PathBuf>,
        filename_template: &str,
        formatter: Arc<dyn LogFormatter>,
    ) -> Result<Self> {
        Ok(Self {
            base_log_folder: base_log_folder.into(),
            filename_template: Template::parse(filename_template)?,
            formatter,
        })
    }

    /// Log file for a record, rendered for today's directory
    pub fn log_path(&self, record: &LogRecord) -> Result<PathBuf> {
        let filename = record
            .field(DAG_FILE_FIELD)
            .and_then(|file| Path::new(file).file_name())
            .and_then(|name| name.to_str())
            .unwrap_or("scheduler")
            .to_string();
        let relative = self.filename_template.render(|name| match name {
            "filename" => Some(filename.clone()),
            other => record.attribute(other),
        })?;
        Ok(self
            .base_log_folder
            .join(Utc::now().format("%Y-%m-%d").to_string())
            .join(relative))
    }

    fn append(&self, record: &LogRecord) -> Result<()> {
        let path = self.log_path(record)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", self.formatter.format(record))?;
        Ok(())
    }
}

impl fmt::Debug for ProcessorFileLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorFileLayer")
            .field("base_log_folder", &self.base_log_folder)
            .field("filename_template", &self.filename_template.source())
            .finish()
    }
}

impl<S: Subscriber> Layer<S> for ProcessorFileLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let record = record_from_event(event);
        if let Err(e) = self.append(&record) {
            eprintln!("failed to write processor log: {}", e);
        }
    }
}
