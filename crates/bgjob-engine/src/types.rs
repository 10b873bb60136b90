// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job data model.
//!
//! The record types serialize to the line format the dashboard reads, so
//! their JSON field names (`class`, `method`, `params`, ...) are fixed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::registry::{HandlerError, InvocationError};

/// Timestamp format used in every log line (`Y-m-d H:i:s`).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time formatted for log lines.
pub fn timestamp_now() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Fresh opaque identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Seconds rounded to 4 decimal places.
pub fn round_duration(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 10_000.0).round() / 10_000.0
}

/// A request to run `operation` on `handler`.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    /// Handler name (resolved through the registry)
    pub handler: String,
    /// Operation name on the handler
    pub operation: String,
    /// Positional arguments
    pub args: Vec<Value>,
    /// Advisory priority. Recorded, never used for ordering.
    pub priority: i64,
    /// Seconds to wait before the first attempt
    pub delay_secs: u64,
    /// Retry count this request starts at
    pub retry_count: u32,
}

impl InvocationRequest {
    /// Create a request with no arguments, priority 0, and no delay.
    pub fn new(handler: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            operation: operation.into(),
            args: Vec::new(),
            priority: 0,
            delay_secs: 0,
            retry_count: 0,
        }
    }

    /// Set the positional arguments.
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Set the advisory priority.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Set the delay before the first attempt.
    pub fn with_delay_secs(mut self, delay_secs: u64) -> Self {
        self.delay_secs = delay_secs;
        self
    }

    /// `Handler::operation`, as used in log messages.
    pub fn display_name(&self) -> String {
        format!("{}::{}", self.handler, self.operation)
    }
}

/// Terminal status of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// The operation returned normally.
    Completed,
    /// The operation raised an error or timed out.
    Failed,
}

/// Start record, written when an attempt begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStart {
    /// Per-attempt identifier
    pub job_id: String,
    /// Handler name
    #[serde(rename = "class")]
    pub handler: String,
    /// Operation name
    #[serde(rename = "method")]
    pub operation: String,
    /// Arguments the attempt runs with
    pub params: Vec<Value>,
    /// Advisory priority
    pub priority: i64,
    /// Local start time
    pub start_time: String,
    /// Identifier shared by every attempt of one request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Completion record, written when an attempt ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCompletion {
    /// Per-attempt identifier
    pub job_id: String,
    /// Terminal status
    pub status: JobStatus,
    /// Seconds between start and completion, 4 decimals
    pub duration: f64,
    /// Local end time
    pub end_time: String,
    /// Identifier shared by every attempt of one request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Error detail nested in an [`ErrorRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Error message
    pub message: String,
    /// Error code
    pub code: i64,
    /// Source file the error was raised in
    pub file: String,
    /// Source line the error was raised at
    pub line: u32,
}

impl From<&HandlerError> for ErrorDetail {
    fn from(err: &HandlerError) -> Self {
        Self {
            message: err.message.clone(),
            code: err.code,
            file: err.file.clone(),
            line: err.line,
        }
    }
}

/// Error record, appended to the error log on every failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Per-attempt identifier
    pub job_id: String,
    /// Handler name
    #[serde(rename = "class")]
    pub handler: String,
    /// Operation name
    #[serde(rename = "method")]
    pub operation: String,
    /// Arguments of the failed attempt
    pub params: Vec<Value>,
    /// Retry count at the time of failure
    pub retry_count: u32,
    /// What went wrong
    pub error: ErrorDetail,
    /// Identifier shared by every attempt of one request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Result of running a request through the retry loop.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// An attempt succeeded.
    Completed {
        /// Attempts made, including the successful one
        attempts: u32,
    },
    /// Every attempt failed and the retry ceiling was reached.
    Failed {
        /// Attempts made
        attempts: u32,
    },
    /// The handler or operation could not be resolved. Never retried.
    Invalid(InvocationError),
    /// The engine's cancellation token fired.
    Cancelled {
        /// Attempts started before cancellation
        attempts: u32,
    },
}

impl JobOutcome {
    /// Whether the job completed.
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }
}
