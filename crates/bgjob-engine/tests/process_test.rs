// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for background dispatch.
//!
//! These tests launch the real `bgjob` binary as a detached child and watch
//! the shared log files for its records.
//!
//! Run with:
//! ```bash
//! cargo test -p bgjob-engine --test process_test
//! ```

mod common;

use std::time::Duration;

use serde_json::json;

use bgjob_engine::log_sink::LogLevel;
use bgjob_engine::process::SpawnError;
use bgjob_engine::types::JobStatus;
use common::{JobLog, TestContext};

const WAIT_LIMIT: Duration = Duration::from_secs(20);

fn background_context() -> TestContext {
    let mut ctx = TestContext::new();
    ctx.config = ctx.config.clone().with_program(env!("CARGO_BIN_EXE_bgjob"));
    ctx
}

/// Re-read a log until `done` holds or the wait limit passes.
async fn wait_for<F>(ctx: &TestContext, errors: bool, done: F) -> JobLog
where
    F: Fn(&JobLog) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    loop {
        let log = if errors {
            ctx.errors().await
        } else {
            ctx.lifecycle().await
        };
        if done(&log) || tokio::time::Instant::now() >= deadline {
            return log;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::test]
async fn test_background_jobs_complete_concurrently() {
    let ctx = background_context();
    let engine = ctx.engine();

    let first = engine
        .run_background(
            "TestBackgroundJob",
            "simpleMethod",
            vec![json!("first")],
            0,
            0,
        )
        .await
        .unwrap();
    let second = engine
        .run_background(
            "TestBackgroundJob",
            "simpleMethod",
            vec![json!("second")],
            0,
            0,
        )
        .await
        .unwrap();
    assert_eq!(first.handler, "TestBackgroundJob");
    assert_eq!(second.operation, "simpleMethod");

    let lifecycle = wait_for(&ctx, false, |log| log.completions().len() >= 2).await;

    let completions = lifecycle.completions();
    assert_eq!(completions.len(), 2);
    assert!(completions.iter().all(|c| c.status == JobStatus::Completed));

    let mut params: Vec<String> = lifecycle
        .starts()
        .iter()
        .map(|s| s.params[0].as_str().unwrap().to_string())
        .collect();
    params.sort();
    assert_eq!(params, vec!["first", "second"]);

    // Both processes appended to the same file; every line must still parse.
    assert!(lifecycle.raw_lines().is_empty());

    let dispatched = lifecycle
        .events(LogLevel::Info)
        .into_iter()
        .filter(|m| m.starts_with("Dispatched background job: TestBackgroundJob::simpleMethod"))
        .count();
    assert_eq!(dispatched, 2);
}

#[tokio::test]
async fn test_hostile_names_are_not_shell_interpreted() {
    let ctx = background_context();
    let engine = ctx.engine();
    let marker = ctx.dir.path().join("pwned");
    let handler = format!("x\"; touch {} #", marker.display());

    // The child rejects the job and exits non-zero, possibly inside the
    // startup window.
    let result = engine
        .run_background(&handler, "$(touch pwned)", Vec::new(), 0, 0)
        .await;
    assert!(matches!(
        result,
        Ok(_) | Err(bgjob_engine::Error::Spawn(SpawnError::StartFailed(_)))
    ));

    let errors = wait_for(&ctx, true, |log| !log.entries.is_empty()).await;
    assert_eq!(errors.entries.len(), 1);
    assert!(
        errors
            .last_event()
            .unwrap()
            .contains("Handler is not registered")
    );
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_dispatch_missing_program_is_reported() {
    let mut ctx = TestContext::new();
    ctx.config = ctx
        .config
        .clone()
        .with_program("/nonexistent/path/to/bgjob-binary-that-does-not-exist");
    let engine = ctx.engine();

    let result = engine
        .run_background("TestBackgroundJob", "simpleMethod", Vec::new(), 0, 0)
        .await;
    assert!(matches!(result, Err(bgjob_engine::Error::Spawn(_))));

    let errors = ctx.errors().await;
    assert!(
        errors
            .last_event()
            .unwrap()
            .starts_with("Failed to dispatch background job: TestBackgroundJob::simpleMethod")
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_immediate_failing_exit_is_start_failure() {
    let mut ctx = TestContext::new();
    ctx.config = ctx.config.clone().with_program("false");
    let engine = ctx.engine();

    let result = engine
        .run_background("TestBackgroundJob", "simpleMethod", Vec::new(), 0, 0)
        .await;
    assert!(matches!(
        result,
        Err(bgjob_engine::Error::Spawn(SpawnError::StartFailed(_)))
    ));

    let errors = ctx.errors().await;
    assert!(
        errors
            .last_event()
            .unwrap()
            .contains("Process start failed")
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_cancel_delayed_background_job() {
    let ctx = background_context();
    let engine = ctx.engine();

    let handle = engine
        .run_background("TestBackgroundJob", "simpleMethod", Vec::new(), 0, 600)
        .await
        .unwrap();
    let pid = handle.pid.unwrap();

    // Wait until the child has logged its first attempt, then kill it.
    wait_for(&ctx, false, |log| {
        log.events(LogLevel::Info)
            .iter()
            .any(|m| m.starts_with("Delaying job execution by 600 seconds"))
    })
    .await;
    bgjob_engine::process::terminate(pid).await.unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let lifecycle = ctx.lifecycle().await;
    assert!(lifecycle.starts().is_empty());
}
