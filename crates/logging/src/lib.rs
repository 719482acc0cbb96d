//! Task logging for Task Log Tee
//!
//! This crate provides the task log handlers (a per-attempt file handler and
//! the stdout tee wrapped around it), record formatters, a size-rotating
//! file writer and the `tracing` layers that connect them to a subscriber.

pub mod appender;
pub mod file_handler;
pub mod filter;
pub mod formatter;
pub mod handler;
pub mod layer;
pub mod logger;
pub mod record;
pub mod stream;
pub mod tee;

// Re-export commonly used types
pub use appender::RotatingFileWriter;
pub use file_handler::FileTaskHandler;
pub use formatter::{build_formatter, ColouredFormatter, JsonFormatter, LogFormatter, TextFormatter};
pub use handler::TaskLogSink;
pub use layer::{ProcessorFileLayer, RecordLayer, TaskHandlerHandle, TaskLogLayer};
pub use logger::{build_layers, build_task_handler, init_logging, LoggingGuard, LoggingLayers};
pub use record::LogRecord;
pub use stream::{SharedStream, StdoutRouter, StreamHandler};
pub use tee::{HandlerState, TeeFileTaskHandler};
