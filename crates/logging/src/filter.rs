//! Per-handler target filters
//!
//! Translates the logger wiring of a [`LoggingConfig`] into a
//! [`LoggerTargets`] filter for each handler layer. Logger names form a
//! hierarchy on dot-separated segments: `airflow.task` covers
//! `airflow.task.hooks` but not `airflow.taskrunner`.

use tracing::{Level, Metadata};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context, Filter};
use tracing_subscriber::EnvFilter;

use log_config::assembler::{LoggerSpec, LoggingConfig};

/// Level thresholds keyed by logger name, with a fallback for everything else
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerTargets {
    default: LevelFilter,
    loggers: Vec<(String, LevelFilter)>,
}

impl LoggerTargets {
    pub fn new(default: LevelFilter) -> Self {
        Self {
            default,
            loggers: Vec::new(),
        }
    }

    pub fn with_logger(mut self, name: impl Into<String>, level: LevelFilter) -> Self {
        self.loggers.push((name.into(), level));
        self
    }

    /// Threshold for a target: the closest configured ancestor logger wins
    pub fn level_for(&self, target: &str) -> LevelFilter {
        self.loggers
            .iter()
            .filter(|(name, _)| covers(name, target))
            .max_by_key(|(name, _)| name.len())
            .map_or(self.default, |(_, level)| *level)
    }

    pub fn would_enable(&self, target: &str, level: &Level) -> bool {
        level <= &self.level_for(target)
    }
}

fn covers(logger: &str, target: &str) -> bool {
    target
        .strip_prefix(logger)
        .map_or(false, |rest| rest.is_empty() || rest.starts_with('.'))
}

impl<S> Filter<S> for LoggerTargets {
    fn enabled(&self, metadata: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        self.would_enable(metadata.target(), metadata.level())
    }

    fn max_level_hint(&self) -> Option<LevelFilter> {
        self.loggers
            .iter()
            .map(|(_, level)| *level)
            .chain(std::iter::once(self.default))
            .max()
    }
}

fn receives(logger: &LoggerSpec, root: &LoggerSpec, handler: &str) -> bool {
    let lists = |spec: &LoggerSpec| spec.handlers.iter().any(|name| name == handler);
    lists(logger) || (logger.propagate && lists(root))
}

/// Targets a handler receives.
///
/// Events under a configured logger reach the handler at the logger's level
/// when the logger lists the handler, or propagates to a root that does.
/// Other targets fall back to the root level for root handlers and are
/// dropped otherwise.
pub fn handler_targets(config: &LoggingConfig, handler: &str) -> LoggerTargets {
    let root = &config.root;
    let default = if root.handlers.iter().any(|name| name == handler) {
        LevelFilter::from(root.level)
    } else {
        LevelFilter::OFF
    };

    config
        .loggers_with_manager()
        .iter()
        .fold(LoggerTargets::new(default), |targets, (name, logger)| {
            let level = if receives(logger, root, handler) {
                LevelFilter::from(logger.level)
            } else {
                LevelFilter::OFF
            };
            targets.with_logger(name.as_str(), level)
        })
}

/// `RUST_LOG` override for the console, if set and valid
pub fn env_override() -> Option<EnvFilter> {
    EnvFilter::try_from_default_env().ok()
}
