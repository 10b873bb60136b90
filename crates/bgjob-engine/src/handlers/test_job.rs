// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `TestBackgroundJob` - exercises the engine end to end.
//!
//! Used by the `self-test` command and the test suite.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info};

use crate::registry::{Handler, HandlerError, Operation};

/// Test handler with one succeeding, one failing, and one flaky operation.
///
/// The flaky operation counts calls in a shared counter, so a factory that
/// hands the same counter to every instance sees it succeed on the third call.
#[derive(Debug, Default, Clone)]
pub struct TestBackgroundJob {
    attempts: Arc<AtomicU32>,
}

impl TestBackgroundJob {
    /// Declared operations. `recordCall` is internal bookkeeping.
    pub const OPERATIONS: &'static [Operation] = &[
        Operation::public("simpleMethod"),
        Operation::public("failingMethod"),
        Operation::public("intermittentMethod"),
        Operation::private("recordCall"),
    ];

    /// Build an instance that counts `intermittentMethod` calls in `attempts`.
    pub fn with_counter(attempts: Arc<AtomicU32>) -> Self {
        Self { attempts }
    }

    fn simple_method(&self, args: &[Value]) -> Result<Value, HandlerError> {
        self.record_call();
        let params = Value::Array(args.to_vec());
        info!(params = %params, "Simple method called");
        Ok(json!(true))
    }

    fn failing_method(&self) -> Result<Value, HandlerError> {
        self.record_call();
        Err(HandlerError::new(
            "Intentional test failure in TestBackgroundJob",
        ))
    }

    fn intermittent_method(&self) -> Result<Value, HandlerError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt < 3 {
            return Err(HandlerError::new(format!(
                "Simulated intermittent failure on attempt {}",
                attempt
            )));
        }
        Ok(json!(format!("Success after {} attempts!", attempt)))
    }

    fn record_call(&self) {
        debug!(calls = self.attempts.load(Ordering::SeqCst), "TestBackgroundJob called");
    }
}

#[async_trait]
impl Handler for TestBackgroundJob {
    async fn invoke(&self, operation: &str, args: Vec<Value>) -> Result<Value, HandlerError> {
        match operation {
            "simpleMethod" => self.simple_method(&args),
            "failingMethod" => self.failing_method(),
            "intermittentMethod" => self.intermittent_method(),
            other => Err(HandlerError::new(format!("Unknown operation: {}", other))),
        }
    }
}
