//! Subscriber initialisation
//!
//! Builds one `tracing` layer per configured handler and installs them on a
//! registry. The returned [`LoggingGuard`] owns the shared task handler and
//! the background writer guards.

use std::sync::Arc;
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use common::error::{Error, Result};
use log_config::assembler::{HandlerSpec, LoggingConfig, LOGGER_TASK};

use crate::appender::RotatingFileWriter;
use crate::file_handler::FileTaskHandler;
use crate::filter::{env_override, handler_targets};
use crate::formatter::{build_formatter, LogFormatter};
use crate::layer::{ProcessorFileLayer, RecordLayer, TaskHandlerHandle, TaskLogLayer};
use crate::stream::StdoutRouter;
use crate::tee::TeeFileTaskHandler;

/// A type-erased layer over the registry
pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Layers built from a configuration, plus the state they share
pub struct LoggingLayers {
    pub layers: Vec<BoxedLayer>,
    pub task_handler: Option<TaskHandlerHandle>,
    pub worker_guards: Vec<WorkerGuard>,
}

/// Keeps logging state alive; closes the task handler when dropped
#[must_use = "dropping the guard closes the task handler and stops background writers"]
pub struct LoggingGuard {
    task_handler: Option<TaskHandlerHandle>,
    _worker_guards: Vec<WorkerGuard>,
}

impl LoggingGuard {
    /// The shared task handler, when a task handler is configured
    pub fn task_handler(&self) -> Option<&TaskHandlerHandle> {
        self.task_handler.as_ref()
    }
}

impl Drop for LoggingGuard {
    fn drop(&mut self) {
        if let Some(handler) = &self.task_handler {
            handler.close();
        }
    }
}

fn formatter_for(config: &LoggingConfig, spec: &HandlerSpec) -> Result<Arc<dyn LogFormatter>> {
    build_formatter(config.formatter(spec.formatter())?)
}

/// Builds the tee task handler described by a `tee_task` handler entry
pub fn build_task_handler(
    config: &LoggingConfig,
    spec: &HandlerSpec,
    stdout: StdoutRouter,
) -> Result<TeeFileTaskHandler> {
    let HandlerSpec::TeeTask {
        base_log_folder,
        filename_template,
        json_fields,
        json_format,
        write_stdout,
        ..
    } = spec
    else {
        return Err(Error::Config(format!("not a task handler: {:?}", spec)));
    };

    let level = config
        .logger(LOGGER_TASK)
        .map_or(config.root.level, |logger| logger.level);
    let inner = FileTaskHandler::new(base_log_folder, filename_template, formatter_for(config, spec)?)?
        .with_level(level);

    Ok(TeeFileTaskHandler::with_fields(
        inner,
        stdout,
        *write_stdout,
        *json_format,
        json_fields.clone(),
    ))
}

/// Builds the layers for every configured handler.
///
/// `console_filter` replaces the console's logger-derived targets when given.
pub fn build_layers(
    config: &LoggingConfig,
    stdout: StdoutRouter,
    mut console_filter: Option<EnvFilter>,
) -> Result<LoggingLayers> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut task_handler = None;
    let mut worker_guards = Vec::new();

    for (name, spec) in config.handlers_with_manager() {
        let targets = handler_targets(config, &name);
        match &spec {
            HandlerSpec::Console { .. } => {
                let layer = RecordLayer::new(formatter_for(config, &spec)?, stdout.clone());
                layers.push(match console_filter.take() {
                    Some(filter) => layer.with_filter(filter).boxed(),
                    None => layer.with_filter(targets).boxed(),
                });
            }
            HandlerSpec::TeeTask { .. } => {
                if task_handler.is_some() {
                    return Err(Error::Config(format!(
                        "handler `{}` is a second task handler",
                        name
                    )));
                }
                let handle = TaskHandlerHandle::new(build_task_handler(config, &spec, stdout.clone())?);
                layers.push(TaskLogLayer::new(handle.clone()).with_filter(targets).boxed());
                task_handler = Some(handle);
            }
            HandlerSpec::FileProcessor {
                base_log_folder,
                filename_template,
                ..
            } => {
                let layer = ProcessorFileLayer::new(
                    base_log_folder,
                    filename_template,
                    formatter_for(config, &spec)?,
                )?;
                layers.push(layer.with_filter(targets).boxed());
            }
            HandlerSpec::RotatingFile {
                filename,
                max_bytes,
                backup_count,
                mode,
                ..
            } => {
                let writer = RotatingFileWriter::open(filename, *max_bytes, *backup_count, *mode)?;
                let (writer, guard) = tracing_appender::non_blocking(writer);
                layers.push(
                    RecordLayer::new(formatter_for(config, &spec)?, writer)
                        .with_filter(targets)
                        .boxed(),
                );
                worker_guards.push(guard);
            }
        }
        debug!("Configured log handler {}", name);
    }

    Ok(LoggingLayers {
        layers,
        task_handler,
        worker_guards,
    })
}

/// Installs the global subscriber for `config`.
///
/// `RUST_LOG`, when set, overrides the console filter. Fails if a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig, stdout: StdoutRouter) -> Result<LoggingGuard> {
    let LoggingLayers {
        layers,
        task_handler,
        worker_guards,
    } = build_layers(config, stdout, env_override())?;

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| Error::Internal(format!("failed to install subscriber: {}", e)))?;

    Ok(LoggingGuard {
        task_handler,
        _worker_guards: worker_guards,
    })
}
