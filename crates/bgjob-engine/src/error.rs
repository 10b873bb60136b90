// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for bgjob-engine.

use thiserror::Error;

/// Engine errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Handler or operation could not be resolved.
    #[error("Invalid invocation: {0}")]
    InvalidInvocation(#[from] crate::registry::InvocationError),

    /// Detached process could not be launched.
    #[error("Spawn error: {0}")]
    Spawn(#[from] crate::process::SpawnError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type using the engine Error.
pub type Result<T> = std::result::Result<T, Error>;
