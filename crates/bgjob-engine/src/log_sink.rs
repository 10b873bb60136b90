// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle log sink.
//!
//! Two append-only files, one record per line:
//!
//! | File | Contents |
//! |------|----------|
//! | `background_jobs.log` | start and completion records, info/warning events |
//! | `background_jobs_errors.log` | error records, error events |
//!
//! Structured records are single-line JSON objects. Free-text events are
//! `[Y-m-d H:i:s] [LEVEL] message` lines. Every event is also emitted through
//! `tracing`, and printed to stdout when the sink is verbose.
//!
//! Each line is written with one `write` on a file opened in append mode, so
//! lines from concurrent writers (threads or processes) never interleave.
//! Append failures are reported through `tracing` and otherwise ignored: a
//! broken log must not fail a job.

use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::types::{ErrorRecord, JobCompletion, JobStart, timestamp_now};

/// Severity of a free-text event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Progress information.
    Info,
    /// Retry announcements.
    Warning,
    /// Failures. Routed to the error log.
    Error,
}

impl LogLevel {
    /// Upper-case label used in event lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }

    /// Parse an upper-case label.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "INFO" => Some(LogLevel::Info),
            "WARNING" => Some(LogLevel::Warning),
            "ERROR" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Format a free-text event line (without trailing newline).
///
/// Line breaks inside `message` are flattened so the event stays one line.
pub fn format_event(timestamp: &str, level: LogLevel, message: &str) -> String {
    let message = message.replace(['\r', '\n'], " ");
    format!("[{}] [{}] {}", timestamp, level.as_str(), message)
}

/// Append-only writer for the lifecycle and error logs.
#[derive(Debug)]
pub struct LogSink {
    lifecycle_path: PathBuf,
    error_path: PathBuf,
    verbose: bool,
    write_lock: Mutex<()>,
}

impl LogSink {
    /// Create a sink writing to the given files. Nothing is created until the
    /// first append.
    pub fn new(
        lifecycle_path: impl Into<PathBuf>,
        error_path: impl Into<PathBuf>,
        verbose: bool,
    ) -> Self {
        Self {
            lifecycle_path: lifecycle_path.into(),
            error_path: error_path.into(),
            verbose,
            write_lock: Mutex::new(()),
        }
    }

    /// Create a sink for the log directory in `config`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.lifecycle_log_path(),
            config.error_log_path(),
            config.verbose,
        )
    }

    /// Path of the lifecycle log.
    pub fn lifecycle_path(&self) -> &Path {
        &self.lifecycle_path
    }

    /// Path of the error log.
    pub fn error_path(&self) -> &Path {
        &self.error_path
    }

    /// Log an info event.
    pub async fn info(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Info, message.as_ref()).await;
    }

    /// Log a warning event.
    pub async fn warning(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Warning, message.as_ref()).await;
    }

    /// Log an error event.
    pub async fn error(&self, message: impl AsRef<str>) {
        self.log(LogLevel::Error, message.as_ref()).await;
    }

    /// Log a free-text event at `level`.
    pub async fn log(&self, level: LogLevel, message: &str) {
        let line = format_event(&timestamp_now(), level, message);

        if self.verbose {
            println!("{}", line);
        }

        match level {
            LogLevel::Info => info!("{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }

        let path = match level {
            LogLevel::Error => &self.error_path,
            LogLevel::Info | LogLevel::Warning => &self.lifecycle_path,
        };
        self.append_line(path, &line).await;
    }

    /// Append a start record to the lifecycle log.
    pub async fn record_start(&self, record: &JobStart) {
        self.append_json(&self.lifecycle_path, record).await;
    }

    /// Append a completion record to the lifecycle log.
    pub async fn record_completion(&self, record: &JobCompletion) {
        self.append_json(&self.lifecycle_path, record).await;
    }

    /// Append an error record to the error log.
    pub async fn record_error(&self, record: &ErrorRecord) {
        self.append_json(&self.error_path, record).await;
    }

    /// Create the log directory and both files if missing.
    pub async fn ensure_files(&self) -> io::Result<()> {
        for path in [&self.lifecycle_path, &self.error_path] {
            open_append(path).await?;
        }
        Ok(())
    }

    async fn append_json<T: Serialize>(&self, path: &Path, record: &T) {
        match serde_json::to_string(record) {
            Ok(line) => self.append_line(path, &line).await,
            Err(e) => warn!(error = %e, "Failed to serialize job log record"),
        }
    }

    async fn append_line(&self, path: &Path, line: &str) {
        if let Err(e) = self.try_append(path, line).await {
            warn!(
                path = %path.display(),
                error = %e,
                "Failed to append to job log"
            );
        }
    }

    /// Append `line` plus a newline to `path` in a single write.
    pub async fn try_append(&self, path: &Path, line: &str) -> io::Result<()> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = open_append(path).await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await
    }
}

/// Open `path` for appending, creating it and its parent directories on demand.
async fn open_append(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);

    match options.open(path).await {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            options.open(path).await
        }
        Err(e) => Err(e),
    }
}
