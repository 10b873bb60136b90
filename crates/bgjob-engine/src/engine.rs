// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job engine - synchronous and background entry points.
//!
//! `run` executes a job in the current task with retry:
//!
//! 1. log "Attempting to run job"
//! 2. validate the handler and operation (invalid jobs are never retried)
//! 3. wait out the attempt's delay
//! 4. write a start record under a fresh job id
//! 5. invoke the operation
//! 6. on success write a completed record and stop
//! 7. on failure write an error record and a failed record, then either
//!    schedule the next attempt with exponential backoff or give up
//!
//! `run_background` launches a detached process that runs the same path.
//!
//! Nothing here fails the caller: every error ends up in the logs and in the
//! returned [`JobOutcome`].

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::EngineConfig;
use crate::dispatcher::{Dispatcher, PreparedInvocation};
use crate::error::Result;
use crate::log_sink::LogSink;
use crate::process::{EntryPoint, ProcessDispatcher, SpawnHandle};
use crate::registry::{HandlerError, HandlerRegistry};
use crate::retry::{AttemptState, RetryPolicy};
use crate::types::{
    ErrorDetail, ErrorRecord, InvocationRequest, JobCompletion, JobOutcome, JobStart, JobStatus,
    new_id, round_duration, timestamp_now,
};

/// Error code recorded when an attempt exceeds its timeout (the exit status of `timeout(1)`).
pub const TIMEOUT_ERROR_CODE: i64 = 124;

/// Runs jobs with retry and records their lifecycle.
#[derive(Debug)]
pub struct JobEngine {
    config: EngineConfig,
    policy: RetryPolicy,
    dispatcher: Dispatcher,
    sink: Arc<LogSink>,
    cancel: CancellationToken,
}

enum AttemptError {
    Failed(HandlerError),
    Cancelled,
}

impl JobEngine {
    /// Create an engine resolving handlers from `registry`.
    pub fn new(config: EngineConfig, registry: HandlerRegistry) -> Self {
        let policy = RetryPolicy::new(config.max_retries)
            .with_preserve_args(config.preserve_retry_args);
        let sink = Arc::new(LogSink::from_config(&config));

        Self {
            config,
            policy,
            dispatcher: Dispatcher::new(Arc::new(registry)),
            sink,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `token` to cancel running jobs.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Retry policy derived from the configuration.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Log sink jobs are recorded in.
    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    /// Token that aborts the running job chain when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run `handler::operation` in the current task.
    ///
    /// Returns true when an attempt succeeded.
    pub async fn run(
        &self,
        handler: &str,
        operation: &str,
        args: Vec<Value>,
        priority: i64,
        delay_secs: u64,
    ) -> bool {
        let request = InvocationRequest::new(handler, operation)
            .with_args(args)
            .with_priority(priority)
            .with_delay_secs(delay_secs);
        self.run_request(request).await.is_success()
    }

    /// Run `request` through the retry loop.
    pub async fn run_request(&self, request: InvocationRequest) -> JobOutcome {
        let request_id = new_id();
        let name = request.display_name();
        let mut state = AttemptState::initial(&request);
        let mut attempts = 0;

        loop {
            self.sink
                .info(format!(
                    "Attempting to run job: {} (Retry: {})",
                    name, state.retry_count
                ))
                .await;

            let prepared = match self
                .dispatcher
                .validate(&request.handler, &request.operation)
            {
                Ok(prepared) => prepared,
                Err(e) => {
                    self.sink
                        .error(format!("Invalid job: {} ({})", name, e))
                        .await;
                    return JobOutcome::Invalid(e);
                }
            };

            if state.delay_secs > 0 {
                self.sink
                    .info(format!(
                        "Delaying job execution by {} seconds",
                        state.delay_secs
                    ))
                    .await;
                if !self.pause(Duration::from_secs(state.delay_secs)).await {
                    self.sink.error(format!("Job cancelled: {}", name)).await;
                    return JobOutcome::Cancelled { attempts };
                }
            }

            attempts += 1;
            let job_id = new_id();
            let started = Instant::now();

            self.sink
                .record_start(&JobStart {
                    job_id: job_id.clone(),
                    handler: request.handler.clone(),
                    operation: request.operation.clone(),
                    params: state.args.clone(),
                    priority: state.priority,
                    start_time: timestamp_now(),
                    request_id: Some(request_id.clone()),
                })
                .await;

            let result = self.invoke(&prepared, state.args.clone()).await;
            let duration = round_duration(started.elapsed());

            let error = match result {
                Ok(_) => {
                    self.record_completion(&job_id, &request_id, JobStatus::Completed, duration)
                        .await;
                    self.sink
                        .info(format!("Job completed successfully: {}", name))
                        .await;
                    return JobOutcome::Completed { attempts };
                }
                Err(AttemptError::Cancelled) => {
                    self.record_completion(&job_id, &request_id, JobStatus::Failed, duration)
                        .await;
                    self.sink.error(format!("Job cancelled: {}", name)).await;
                    return JobOutcome::Cancelled { attempts };
                }
                Err(AttemptError::Failed(error)) => error,
            };

            self.sink
                .record_error(&ErrorRecord {
                    job_id: job_id.clone(),
                    handler: request.handler.clone(),
                    operation: request.operation.clone(),
                    params: state.args.clone(),
                    retry_count: state.retry_count,
                    error: ErrorDetail::from(&error),
                    request_id: Some(request_id.clone()),
                })
                .await;
            self.sink
                .error(format!(
                    "Job Failure - ID: {}, Class: {}, Method: {}, Error: {}",
                    job_id, request.handler, request.operation, error.message
                ))
                .await;
            self.record_completion(&job_id, &request_id, JobStatus::Failed, duration)
                .await;

            match state.next(&self.policy, &request) {
                Some(next) => {
                    self.sink
                        .warning(format!(
                            "Retry attempt {} for job. Delay: {} seconds",
                            next.retry_count, next.delay_secs
                        ))
                        .await;
                    state = next;
                }
                None => {
                    self.sink
                        .error("Max retries reached for job. Giving up.")
                        .await;
                    return JobOutcome::Failed { attempts };
                }
            }
        }
    }

    /// Launch `handler::operation` in a detached process.
    ///
    /// Returns once the process has started. The job's own outcome is only
    /// visible in the logs; a launch failure is logged and returned.
    pub async fn run_background(
        &self,
        handler: &str,
        operation: &str,
        args: Vec<Value>,
        priority: i64,
        delay_secs: u64,
    ) -> Result<SpawnHandle> {
        let request = InvocationRequest::new(handler, operation)
            .with_args(args)
            .with_priority(priority)
            .with_delay_secs(delay_secs);
        let name = request.display_name();

        let spawned: Result<SpawnHandle> = match EntryPoint::from_config(&self.config) {
            Ok(entry) => ProcessDispatcher::new(entry)
                .spawn(&request)
                .await
                .map_err(Into::into),
            Err(e) => Err(e.into()),
        };

        match spawned {
            Ok(handle) => {
                let pid = handle
                    .pid
                    .map(|pid| pid.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                self.sink
                    .info(format!("Dispatched background job: {} (PID: {})", name, pid))
                    .await;
                Ok(handle)
            }
            Err(e) => {
                self.sink
                    .error(format!("Failed to dispatch background job: {} ({})", name, e))
                    .await;
                Err(e)
            }
        }
    }

    async fn record_completion(
        &self,
        job_id: &str,
        request_id: &str,
        status: JobStatus,
        duration: f64,
    ) {
        self.sink
            .record_completion(&JobCompletion {
                job_id: job_id.to_string(),
                status,
                duration,
                end_time: timestamp_now(),
                request_id: Some(request_id.to_string()),
            })
            .await;
    }

    async fn invoke(
        &self,
        prepared: &PreparedInvocation,
        args: Vec<Value>,
    ) -> std::result::Result<Value, AttemptError> {
        let limited = async {
            match self.config.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, prepared.invoke(args)).await {
                    Ok(result) => result,
                    Err(_) => Err(HandlerError::with_code(
                        format!("Attempt timed out after {:?}", limit),
                        TIMEOUT_ERROR_CODE,
                    )),
                },
                None => prepared.invoke(args).await,
            }
        };

        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => {
                debug!(
                    handler = %prepared.handler(),
                    operation = %prepared.operation(),
                    "Attempt cancelled"
                );
                Err(AttemptError::Cancelled)
            }

            result = limited => result.map_err(AttemptError::Failed),
        }
    }

    /// Sleep for `duration` unless cancelled first. Returns false on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;

            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
