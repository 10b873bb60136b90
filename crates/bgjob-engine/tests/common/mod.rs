// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for bgjob-engine integration tests.
//!
//! Provides a TestContext with a throwaway log directory and helpers to read
//! the job logs back in write order.

#![allow(dead_code)]

use std::path::Path;

use tempfile::TempDir;

use bgjob_engine::log_reader::{LogEntry, read_newest_first};
use bgjob_engine::log_sink::LogLevel;
use bgjob_engine::types::{ErrorRecord, JobCompletion, JobStart};
use bgjob_engine::{EngineConfig, HandlerRegistry, JobEngine};

/// Temporary log directory plus the configuration pointing at it.
pub struct TestContext {
    pub dir: TempDir,
    pub config: EngineConfig,
}

impl TestContext {
    /// Quiet configuration logging into a fresh temp dir.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = EngineConfig::default()
            .with_log_dir(dir.path())
            .with_verbose(false);
        Self { dir, config }
    }

    /// Engine over the registry the `bgjob` binary uses.
    pub fn engine(&self) -> JobEngine {
        JobEngine::new(self.config.clone(), HandlerRegistry::with_builtins())
    }

    /// Engine over `registry`.
    pub fn engine_with(&self, registry: HandlerRegistry) -> JobEngine {
        JobEngine::new(self.config.clone(), registry)
    }

    /// Lifecycle log entries, oldest first.
    pub async fn lifecycle(&self) -> JobLog {
        JobLog::read(&self.config.lifecycle_log_path()).await
    }

    /// Error log entries, oldest first.
    pub async fn errors(&self) -> JobLog {
        JobLog::read(&self.config.error_log_path()).await
    }
}

/// Parsed log file in write order.
pub struct JobLog {
    pub entries: Vec<LogEntry>,
}

impl JobLog {
    pub async fn read(path: &Path) -> Self {
        let mut entries = read_newest_first(path).await.expect("Failed to read log");
        entries.reverse();
        Self { entries }
    }

    pub fn starts(&self) -> Vec<&JobStart> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                LogEntry::Start(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn completions(&self) -> Vec<&JobCompletion> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                LogEntry::Completion(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn error_records(&self) -> Vec<&ErrorRecord> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                LogEntry::Error(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    /// Messages of free-text events at `level`.
    pub fn events(&self, level: LogLevel) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                LogEntry::Event {
                    level: l, message, ..
                } if *l == level => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn raw_lines(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter_map(|e| match e {
                LogEntry::Raw(line) => Some(line.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn last_event(&self) -> Option<&str> {
        self.entries.iter().rev().find_map(|e| match e {
            LogEntry::Event { message, .. } => Some(message.as_str()),
            _ => None,
        })
    }
}
