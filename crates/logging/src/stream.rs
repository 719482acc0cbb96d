//! Standard output routing and stream handlers
//!
//! [`StdoutRouter`] is captured once at process start. It remembers the
//! original stdout and a current target that task runners may redirect
//! (for example into the task log). Handlers that must reach the real
//! terminal write to [`StdoutRouter::original`].

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use parking_lot::Mutex;
use tracing::debug;
use tracing_subscriber::fmt::MakeWriter;

use common::types::LogLevel;

use crate::formatter::LogFormatter;
use crate::record::LogRecord;

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Cloneable, thread-safe handle to an output stream
#[derive(Clone)]
pub struct SharedStream(SharedWriter);

impl SharedStream {
    pub fn new<W: Write + Send + 'static>(writer: W) -> Self {
        Self(Arc::new(Mutex::new(Box::new(writer))))
    }

    /// True when both handles write to the same stream
    pub fn same_stream(&self, other: &SharedStream) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SharedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedStream").finish_non_exhaustive()
    }
}

impl Write for SharedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.lock().write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().flush()
    }
}

/// The process's original stdout plus its current, possibly redirected, target
#[derive(Clone, Debug)]
pub struct StdoutRouter {
    original: SharedStream,
    redirect: Arc<Mutex<Option<SharedStream>>>,
}

impl StdoutRouter {
    /// Captures the real process stdout
    pub fn capture() -> Self {
        Self::from_writer(io::stdout())
    }

    /// Uses an arbitrary writer as the "original" stdout
    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            original: SharedStream::new(writer),
            redirect: Arc::new(Mutex::new(None)),
        }
    }

    /// The stream captured at construction, unaffected by redirection
    pub fn original(&self) -> SharedStream {
        self.original.clone()
    }

    /// The stream stdout currently points at
    pub fn current(&self) -> SharedStream {
        self.redirect
            .lock()
            .clone()
            .unwrap_or_else(|| self.original.clone())
    }

    /// Points stdout at another writer until [`StdoutRouter::restore`]
    pub fn redirect<W: Write + Send + 'static>(&self, writer: W) {
        *self.redirect.lock() = Some(SharedStream::new(writer));
    }

    /// Points stdout back at the original stream
    pub fn restore(&self) {
        let previous = self.redirect.lock().take();
        if let Some(mut previous) = previous {
            let _ = previous.flush();
            debug!("stdout restored to original stream");
        }
    }

    pub fn is_redirected(&self) -> bool {
        self.redirect.lock().is_some()
    }
}

impl<'a> MakeWriter<'a> for StdoutRouter {
    type Writer = SharedStream;

    fn make_writer(&'a self) -> Self::Writer {
        self.current()
    }
}

/// Writes formatted records to a stream
#[derive(Debug)]
pub struct StreamHandler {
    stream: SharedStream,
    level: LogLevel,
    formatter: Arc<dyn LogFormatter>,
    closed: bool,
}

impl StreamHandler {
    pub fn new(stream: SharedStream, level: LogLevel, formatter: Arc<dyn LogFormatter>) -> Self {
        Self {
            stream,
            level,
            formatter,
            closed: false,
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn formatter(&self) -> &Arc<dyn LogFormatter> {
        &self.formatter
    }

    pub fn set_formatter(&mut self, formatter: Arc<dyn LogFormatter>) {
        self.formatter = formatter;
    }

    pub fn stream(&self) -> &SharedStream {
        &self.stream
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Writes the record regardless of level; write failures are dropped
    pub fn emit(&mut self, record: &LogRecord) {
        if self.closed {
            return;
        }
        let mut line = self.formatter.format(record);
        line.push('\n');
        let written = self
            .stream
            .write_all(line.as_bytes())
            .and_then(|()| self.stream.flush());
        if let Err(e) = written {
            debug!(error = %e, "failed to write record to stream");
        }
    }

    /// Emits the record if it meets the level threshold
    pub fn handle(&mut self, record: &LogRecord) {
        if record.level >= self.level {
            self.emit(record);
        }
    }

    pub fn close(&mut self) {
        if !self.closed {
            let _ = self.stream.flush();
            self.closed = true;
        }
    }
}

/// In-memory writer for tests
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct CaptureBuffer(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl CaptureBuffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8(self.0.lock().clone()).unwrap()
    }
}

#[cfg(test)]
impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::TextFormatter;

    #[test]
    fn test_redirect_and_restore() {
        let original = CaptureBuffer::default();
        let redirected = CaptureBuffer::default();
        let router = StdoutRouter::from_writer(original.clone());

        router.redirect(redirected.clone());
        assert!(router.is_redirected());
        router.current().write_all(b"to task log\n").unwrap();
        router.original().write_all(b"to terminal\n").unwrap();

        router.restore();
        assert!(!router.is_redirected());
        assert!(router.current().same_stream(&router.original()));
        router.current().write_all(b"back\n").unwrap();

        assert_eq!(redirected.contents(), "to task log\n");
        assert_eq!(original.contents(), "to terminal\nback\n");
    }

    #[test]
    fn test_stream_handler_levels() {
        let buffer = CaptureBuffer::default();
        let formatter = Arc::new(TextFormatter::new("{levelname}:{message}").unwrap());
        let mut handler = StreamHandler::new(SharedStream::new(buffer.clone()), LogLevel::Warn, formatter);

        handler.handle(&LogRecord::new(LogLevel::Info, "t", "filtered"));
        handler.handle(&LogRecord::new(LogLevel::Error, "t", "shown"));
        handler.emit(&LogRecord::new(LogLevel::Debug, "t", "forced"));
        handler.close();
        handler.emit(&LogRecord::new(LogLevel::Error, "t", "after close"));

        assert!(handler.is_closed());
        assert_eq!(buffer.contents(), "ERROR:shown\nDEBUG:forced\n");
    }
}
