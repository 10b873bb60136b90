// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reader for the job logs.
//!
//! Reads a log file newest-first and classifies every line. Lines from
//! concurrent writers may arrive in any order, and lines that are neither a
//! known record nor an event line degrade to [`LogEntry::Raw`] rather than
//! failing the read.

use serde::Deserialize;
use std::io;
use std::path::Path;

use crate::log_sink::LogLevel;
use crate::types::{ErrorRecord, JobCompletion, JobStart};

/// One classified log line.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    /// Start record.
    Start(JobStart),
    /// Completion record.
    Completion(JobCompletion),
    /// Error record.
    Error(ErrorRecord),
    /// `[timestamp] [LEVEL] message` line.
    Event {
        /// Timestamp as written
        timestamp: String,
        /// Severity
        level: LogLevel,
        /// Message text
        message: String,
    },
    /// Anything else, verbatim.
    Raw(String),
}

impl LogEntry {
    /// Job id of a structured record.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            LogEntry::Start(r) => Some(&r.job_id),
            LogEntry::Completion(r) => Some(&r.job_id),
            LogEntry::Error(r) => Some(&r.job_id),
            LogEntry::Event { .. } | LogEntry::Raw(_) => None,
        }
    }

    /// Request id of a structured record, when it carries one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            LogEntry::Start(r) => r.request_id.as_deref(),
            LogEntry::Completion(r) => r.request_id.as_deref(),
            LogEntry::Error(r) => r.request_id.as_deref(),
            LogEntry::Event { .. } | LogEntry::Raw(_) => None,
        }
    }
}

// Order matters: error records are tried before start records because both
// carry class/method/params.
#[derive(Deserialize)]
#[serde(untagged)]
enum StructuredRecord {
    Error(ErrorRecord),
    Start(JobStart),
    Completion(JobCompletion),
}

/// Classify a single line.
pub fn parse_line(line: &str) -> LogEntry {
    let trimmed = line.trim_end_matches(['\r', '\n']);

    if trimmed.starts_with('{')
        && let Ok(record) = serde_json::from_str::<StructuredRecord>(trimmed)
    {
        return match record {
            StructuredRecord::Error(r) => LogEntry::Error(r),
            StructuredRecord::Start(r) => LogEntry::Start(r),
            StructuredRecord::Completion(r) => LogEntry::Completion(r),
        };
    }

    match parse_event(trimmed) {
        Some((timestamp, level, message)) => LogEntry::Event {
            timestamp: timestamp.to_string(),
            level,
            message: message.to_string(),
        },
        None => LogEntry::Raw(trimmed.to_string()),
    }
}

fn parse_event(line: &str) -> Option<(&str, LogLevel, &str)> {
    let rest = line.strip_prefix('[')?;
    let (timestamp, rest) = rest.split_once("] [")?;
    let (level, message) = rest.split_once("] ")?;
    Some((timestamp, LogLevel::parse(level)?, message))
}

/// Read every non-empty line of `path`, newest first.
///
/// A missing file reads as empty.
pub async fn read_newest_first(path: &Path) -> io::Result<Vec<LogEntry>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    Ok(content
        .lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .map(parse_line)
        .collect())
}
