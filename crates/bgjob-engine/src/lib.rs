// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! bgjob Engine - Background Job Execution
//!
//! Runs named handler operations either in-process with retry, or in a
//! detached OS process that re-enters the same path.
//!
//! # Architecture
//!
//! ```text
//!   caller ──► JobEngine::run ──► retry loop ──► Dispatcher ──► Handler
//!                                     │          (validate +     (registered
//!                                     │           invoke)         by name)
//!                                     ▼
//!                                  LogSink ──► background_jobs.log
//!                                          └─► background_jobs_errors.log
//!
//!   caller ──► JobEngine::run_background ──► ProcessDispatcher
//!                                              │ spawn (detached)
//!                                              ▼
//!                                  bgjob background:run ... ──► JobEngine::run
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`registry`] | `Handler` trait and name → factory registry |
//! | [`dispatcher`] | Validation and invocation of one operation |
//! | [`retry`] | Backoff policy and attempt state |
//! | [`engine`] | Synchronous and background entry points |
//! | [`log_sink`] | Append-only lifecycle and error logs |
//! | [`log_reader`] | Newest-first log reading for dashboards |
//! | [`process`] | Detached process launch and termination |
//!
//! # Retry
//!
//! A failed attempt is retried up to `max_retries` times (default 3), waiting
//! `2^n` seconds before retry `n + 1`. Invalid invocations (unknown handler,
//! missing or private operation) are never retried.
//!
//! # Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BGJOB_LOG_DIR` | `storage/logs` | Directory for both log files |
//! | `BGJOB_MAX_RETRIES` | `3` | Retry ceiling |
//! | `BGJOB_VERBOSE` | `true` | Print events to stdout |
//! | `BGJOB_ATTEMPT_TIMEOUT_SECS` | - | Per-attempt timeout |
//! | `BGJOB_PRESERVE_RETRY_ARGS` | `false` | Keep args/priority on retry |
//! | `BGJOB_PROGRAM` | current executable | Program for background jobs |
//! | `BGJOB_ENTRY_SCRIPT` | - | Script argument before `background:run` |

#![deny(missing_docs)]

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod log_reader;
pub mod log_sink;
pub mod process;
pub mod registry;
pub mod retry;
pub mod types;

#[doc(hidden)]
pub use inventory;

pub use config::EngineConfig;
pub use engine::JobEngine;
pub use error::{Error, Result};
pub use registry::{Handler, HandlerError, HandlerRegistry, InvocationError, Operation};
pub use types::{InvocationRequest, JobOutcome};
