// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Retry policy and per-attempt state.
//!
//! Backoff is `2^retry_count` seconds with no jitter: a request allowed three
//! retries waits 1s, 2s, then 4s before its second, third, and fourth attempts.

use serde_json::Value;
use std::time::Duration;

use crate::config::DEFAULT_MAX_RETRIES;
use crate::types::InvocationRequest;

/// How failed attempts are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Carry the original arguments and priority into retried attempts.
    /// When false, retries run with no arguments and priority 0.
    pub preserve_args: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            preserve_args: false,
        }
    }
}

impl RetryPolicy {
    /// Policy with `max_retries` and argument reset on retry.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            preserve_args: false,
        }
    }

    /// Keep arguments and priority across retries.
    pub fn with_preserve_args(mut self, preserve: bool) -> Self {
        self.preserve_args = preserve;
        self
    }

    /// Delay before the retry that follows a failure at `retry_count`.
    pub fn backoff(retry_count: u32) -> Duration {
        Duration::from_secs(2u64.saturating_pow(retry_count))
    }

    /// Every backoff delay this policy can impose, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_retries).map(Self::backoff).collect()
    }

    /// Whether a failure at `retry_count` is followed by another attempt.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

/// State of the attempt about to run.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptState {
    /// Retries performed before this attempt
    pub retry_count: u32,
    /// Seconds to wait before this attempt runs
    pub delay_secs: u64,
    /// Arguments for this attempt
    pub args: Vec<Value>,
    /// Priority recorded for this attempt
    pub priority: i64,
}

impl AttemptState {
    /// State of the first attempt of `request`.
    pub fn initial(request: &InvocationRequest) -> Self {
        Self {
            retry_count: request.retry_count,
            delay_secs: request.delay_secs,
            args: request.args.clone(),
            priority: request.priority,
        }
    }

    /// State of the attempt that follows a failure of this one, or `None`
    /// once the policy's ceiling is reached.
    pub fn next(&self, policy: &RetryPolicy, request: &InvocationRequest) -> Option<Self> {
        if !policy.should_retry(self.retry_count) {
            return None;
        }

        let (args, priority) = if policy.preserve_args {
            (request.args.clone(), request.priority)
        } else {
            (Vec::new(), 0)
        };

        Some(Self {
            retry_count: self.retry_count + 1,
            delay_secs: RetryPolicy::backoff(self.retry_count).as_secs(),
            args,
            priority,
        })
    }
}
