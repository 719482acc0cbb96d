//! Common data models for Task Log Tee
//!
//! This module defines the task-attempt identity that log handlers are bound to.

use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// strftime pattern producing `YYYY_MM_DDTHH_MM_SS_ffffff`
pub const CLEAN_EXECUTION_DATE_FORMAT: &str = "%Y_%m_%dT%H_%M_%S_%6f";

/// One execution attempt of a scheduled task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAttempt {
    /// Identifier of the workflow (DAG) run the task belongs to
    pub dag_id: String,
    /// Task identifier
    pub task_id: String,
    /// Logical execution timestamp of the run
    pub execution_date: DateTime<Utc>,
    /// Attempt (retry) number, starting at 1
    pub try_number: u32,
    /// Raw executions skip end-of-log finalization
    pub raw: bool,
}

impl TaskAttempt {
    /// Creates a new, non-raw task attempt
    pub fn new(
        dag_id: impl Into<String>,
        task_id: impl Into<String>,
        execution_date: DateTime<Utc>,
        try_number: u32,
    ) -> Self {
        Self {
            dag_id: dag_id.into(),
            task_id: task_id.into(),
            execution_date,
            try_number,
            raw: false,
        }
    }

    /// Marks the attempt as raw (or not)
    pub fn with_raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    /// Execution date escaped so it is safe to use in paths and queries
    pub fn clean_execution_date(&self) -> String {
        self.execution_date
            .format(CLEAN_EXECUTION_DATE_FORMAT)
            .to_string()
    }

    /// Looks up a template placeholder by name.
    ///
    /// Known names are `dag_id`, `task_id`, `execution_date`, `ts`
    /// (RFC 3339 timestamp) and `try_number`.
    pub fn placeholder(&self, name: &str) -> Option<String> {
        match name {
            "dag_id" => Some(self.dag_id.clone()),
            "task_id" => Some(self.task_id.clone()),
            "execution_date" => Some(self.clean_execution_date()),
            "ts" => Some(self.execution_date.to_rfc3339()),
            "try_number" => Some(self.try_number.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for TaskAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} @ {} (try {})",
            self.dag_id,
            self.task_id,
            self.execution_date.to_rfc3339(),
            self.try_number
        )?;
        if self.raw {
            write!(f, " [raw]")?;
        }
        Ok(())
    }
}
