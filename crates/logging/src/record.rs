//! Log records
//!
//! A [`LogRecord`] is the unit handlers and formatters work on. It carries
//! the standard attributes (`asctime`, `levelname`, `name`, `message`,
//! `filename`, `lineno`) plus free-form extra fields.

use chrono::{DateTime, Utc};
use serde_json::Value;

use common::types::LogLevel;

/// strftime pattern for the `asctime` attribute
pub const ASCTIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

/// A single log record
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    /// Logger name (the `tracing` target)
    pub name: String,
    pub message: String,
    pub created: DateTime<Utc>,
    pub filename: Option<String>,
    pub lineno: Option<u32>,
    /// Extra fields in insertion order
    pub fields: Vec<(String, String)>,
}

impl LogRecord {
    /// Creates a record stamped with the current time
    pub fn new(level: LogLevel, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            name: name.into(),
            message: message.into(),
            created: Utc::now(),
            filename: None,
            lineno: None,
            fields: Vec::new(),
        }
    }

    /// Sets the source location
    pub fn with_location(mut self, filename: Option<&str>, lineno: Option<u32>) -> Self {
        self.filename = filename.map(str::to_string);
        self.lineno = lineno;
        self
    }

    /// Adds an extra field
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Looks up an extra field by name
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Creation time formatted as `asctime`
    pub fn asctime(&self) -> String {
        self.created.format(ASCTIME_FORMAT).to_string()
    }

    /// Looks up a standard attribute or extra field as a string
    pub fn attribute(&self, name: &str) -> Option<String> {
        match name {
            "asctime" => Some(self.asctime()),
            "levelname" => Some(self.level.as_str().to_string()),
            "name" => Some(self.name.clone()),
            "message" => Some(self.message.clone()),
            "filename" => self.filename.clone(),
            "lineno" => self.lineno.map(|line| line.to_string()),
            "created" => Some(self.created.to_rfc3339()),
            _ => self.field(name).map(str::to_string),
        }
    }

    /// Looks up an attribute as a JSON value, `null` when absent
    pub fn json_attribute(&self, name: &str) -> Value {
        match name {
            "lineno" => self.lineno.map_or(Value::Null, Value::from),
            _ => self.attribute(name).map_or(Value::Null, Value::from),
        }
    }
}
