//! Record formatters
//!
//! Formatters turn a [`LogRecord`] into the line a handler writes. Plain and
//! coloured formatters render a placeholder template; the JSON formatter
//! wraps the rendered line in an envelope of selected fields.

use std::fmt;
use std::sync::Arc;
use serde_json::{Map, Value};

use common::error::Result;
use common::template::Template;
use common::types::LogLevel;
use log_config::{FormatterKind, FormatterSpec};

use crate::record::LogRecord;

/// Formats records into output lines (without trailing newline)
pub trait LogFormatter: Send + Sync + fmt::Debug {
    fn format(&self, record: &LogRecord) -> String;

    /// The placeholder template behind this formatter, if it has one
    fn template(&self) -> Option<&str> {
        None
    }
}

/// Builds the formatter described by a configuration entry
pub fn build_formatter(spec: &FormatterSpec) -> Result<Arc<dyn LogFormatter>> {
    Ok(match spec.kind {
        FormatterKind::Plain => Arc::new(TextFormatter::new(&spec.format)?),
        FormatterKind::Coloured => Arc::new(ColouredFormatter::new(&spec.format)?),
    })
}

/// Renders records through a placeholder template
#[derive(Debug, Clone)]
pub struct TextFormatter {
    template: Template,
}

impl TextFormatter {
    pub fn new(format: &str) -> Result<Self> {
        Ok(Self {
            template: Template::parse(format)?,
        })
    }
}

impl LogFormatter for TextFormatter {
    fn format(&self, record: &LogRecord) -> String {
        self.template.render_lossy(|name| record.attribute(name))
    }

    fn template(&self) -> Option<&str> {
        Some(self.template.source())
    }
}

const RESET: &str = "\x1b[0m";

fn colour_code(name: &str) -> Option<&'static str> {
    match name {
        "reset" => Some(RESET),
        "bold" => Some("\x1b[1m"),
        "red" => Some("\x1b[31m"),
        "green" => Some("\x1b[32m"),
        "yellow" => Some("\x1b[33m"),
        "blue" => Some("\x1b[34m"),
        "purple" => Some("\x1b[35m"),
        "cyan" => Some("\x1b[36m"),
        "white" => Some("\x1b[37m"),
        _ => None,
    }
}

fn level_colour(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace | LogLevel::Debug => "\x1b[36m",
        LogLevel::Info => "\x1b[32m",
        LogLevel::Warn => "\x1b[33m",
        LogLevel::Error => "\x1b[31m",
    }
}

/// Template formatter that also resolves ANSI colour placeholders
/// (`{blue}`, `{reset}`, `{log_color}`, ...)
#[derive(Debug, Clone)]
pub struct ColouredFormatter {
    template: Template,
}

impl ColouredFormatter {
    pub fn new(format: &str) -> Result<Self> {
        Ok(Self {
            template: Template::parse(format)?,
        })
    }
}

impl LogFormatter for ColouredFormatter {
    fn format(&self, record: &LogRecord) -> String {
        self.template.render_lossy(|name| {
            if name == "log_color" {
                return Some(level_colour(record.level).to_string());
            }
            colour_code(name)
                .map(str::to_string)
                .or_else(|| record.attribute(name))
        })
    }

    fn template(&self) -> Option<&str> {
        Some(self.template.source())
    }
}

/// Formats records as one-line JSON objects.
///
/// The envelope holds exactly the configured `json_fields`, in order, then
/// `extras`. Field values are record attributes (`message` is the record's
/// own message, `null` when the record lacks the attribute). An extra whose
/// key is already present overwrites that value in place.
#[derive(Debug, Clone)]
pub struct JsonFormatter {
    text: TextFormatter,
    json_fields: Vec<String>,
    extras: Vec<(String, String)>,
}

impl JsonFormatter {
    pub fn new(format: &str, json_fields: Vec<String>, extras: Vec<(String, String)>) -> Result<Self> {
        Ok(Self {
            text: TextFormatter::new(format)?,
            json_fields,
            extras,
        })
    }

    pub fn json_fields(&self) -> &[String] {
        &self.json_fields
    }

    pub fn extras(&self) -> &[(String, String)] {
        &self.extras
    }

    /// Builds the envelope without serializing it
    pub fn envelope(&self, record: &LogRecord) -> Map<String, Value> {
        let mut envelope = Map::new();
        for label in &self.json_fields {
            envelope.insert(label.clone(), record.json_attribute(label));
        }
        for (key, value) in &self.extras {
            envelope.insert(key.clone(), Value::from(value.as_str()));
        }
        envelope
    }
}

impl LogFormatter for JsonFormatter {
    fn format(&self, record: &LogRecord) -> String {
        Value::Object(self.envelope(record)).to_string()
    }

    fn template(&self) -> Option<&str> {
        self.text.template()
    }
}
