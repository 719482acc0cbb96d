//! Task log sink capability
//!
//! The seam between the tee handler and whatever persists a task attempt's
//! log. [`crate::FileTaskHandler`] is the on-disk implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::error::Result;
use common::models::TaskAttempt;
use common::types::LogLevel;

use crate::formatter::LogFormatter;
use crate::record::LogRecord;

/// A log sink that is bound to one task attempt at a time
pub trait TaskLogSink: Send {
    /// Binds the sink to a task attempt, preparing its output
    fn set_context(&mut self, attempt: &TaskAttempt) -> Result<()>;

    /// Writes a record unconditionally
    fn emit(&mut self, record: &LogRecord);

    /// Flushes and releases the sink's resources
    fn close(&mut self);

    /// Severity threshold applied by [`TaskLogSink::handle`]
    fn level(&self) -> LogLevel;

    /// Formatter used for written records
    fn formatter(&self) -> Arc<dyn LogFormatter>;

    /// Root directory of the on-disk logs
    fn local_base(&self) -> &Path;

    /// Log file path of an attempt, relative to [`TaskLogSink::local_base`]
    fn render_filename(&self, attempt: &TaskAttempt) -> Result<PathBuf>;

    /// Emits the record if it meets the severity threshold
    fn handle(&mut self, record: &LogRecord) {
        if record.level >= self.level() {
            self.emit(record);
        }
    }
}
