// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! bgjob - background job runner CLI
//!
//! Usage:
//!   bgjob <command> [options]
//!
//! Commands:
//!   background:run <handler> <operation> [json-args] [priority] [delay]
//!   background:dispatch <handler> <operation> [json-args] [priority] [delay]
//!   self-test
//!   cancel <pid>
//!
//! `background:run` is also what detached background jobs execute.

use anyhow::Context;
use bgjob_engine::process::terminate;
use bgjob_engine::{EngineConfig, HandlerRegistry, JobEngine};
use serde_json::{Value, json};
use std::process::ExitCode;
use tracing::warn;

fn print_usage() {
    eprintln!(
        r#"Usage: bgjob <command> [options]

Run named handler operations with retry, in-process or in the background.

COMMANDS:
    background:run <handler> <operation> [json-args] [priority] [delay]
                                    Run a job now, retrying on failure
    background:dispatch <handler> <operation> [json-args] [priority] [delay]
                                    Run a job in a detached process
    self-test                       Run the TestBackgroundJob checks
    cancel <pid>                    Terminate a background job process

ARGUMENTS:
    json-args                       JSON array of positional arguments (default: [])
    priority                        Advisory priority (default: 0)
    delay                           Seconds to wait before the first attempt (default: 0)

ENVIRONMENT:
    BGJOB_LOG_DIR                   Log directory (default: storage/logs)
    BGJOB_MAX_RETRIES               Retry ceiling (default: 3)
    BGJOB_VERBOSE                   Print job events to stdout (default: true)
    BGJOB_ATTEMPT_TIMEOUT_SECS      Per-attempt timeout (default: none)
    BGJOB_PRESERVE_RETRY_ARGS       Keep arguments on retry (default: false)
    BGJOB_PROGRAM                   Program for background jobs (default: this binary)
    BGJOB_ENTRY_SCRIPT              Script argument before background:run
    RUST_LOG                        Process log filter

EXAMPLES:
    bgjob background:run TestBackgroundJob simpleMethod '["a","b"]'
    bgjob background:dispatch TestBackgroundJob failingMethod '[]' 0 10
"#
    );
}

/// Job arguments shared by `background:run` and `background:dispatch`.
#[derive(Debug, PartialEq)]
struct JobArgs {
    handler: String,
    operation: String,
    args: Vec<Value>,
    priority: i64,
    delay_secs: u64,
}

#[derive(Debug, PartialEq)]
enum Command {
    Run(JobArgs),
    Dispatch(JobArgs),
    SelfTest,
    Cancel { pid: u32 },
    Help,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let Some(command) = args.first() else {
        return Ok(Command::Help);
    };

    match command.as_str() {
        "background:run" => parse_job_args(&args[1..]).map(Command::Run),
        "background:dispatch" => parse_job_args(&args[1..]).map(Command::Dispatch),
        "self-test" => Ok(Command::SelfTest),
        "cancel" => {
            let pid = args
                .get(1)
                .ok_or("cancel requires a process id")?
                .parse()
                .map_err(|_| format!("invalid process id: {}", args[1]))?;
            Ok(Command::Cancel { pid })
        }
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => Err(format!("unknown command: {}", other)),
    }
}

fn parse_job_args(args: &[String]) -> Result<JobArgs, String> {
    let handler = args.first().ok_or("missing handler name")?.clone();
    let operation = args.get(1).ok_or("missing operation name")?.clone();

    Ok(JobArgs {
        handler,
        operation,
        args: parse_params(args.get(2).map(String::as_str)),
        priority: args.get(3).and_then(|v| v.trim().parse().ok()).unwrap_or(0),
        delay_secs: args.get(4).and_then(|v| v.trim().parse().ok()).unwrap_or(0),
    })
}

/// Anything other than a JSON array means "no arguments".
fn parse_params(raw: Option<&str>) -> Vec<Value> {
    match raw.map(serde_json::from_str::<Value>) {
        Some(Ok(Value::Array(items))) => items,
        Some(Ok(_)) | Some(Err(_)) => {
            warn!(params = ?raw, "Ignoring job arguments that are not a JSON array");
            Vec::new()
        }
        None => Vec::new(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bgjob=info,bgjob_engine=warn".into()),
        )
        .init();

    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match execute(command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Command) -> anyhow::Result<ExitCode> {
    match command {
        Command::Help => {
            print_usage();
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(job) => {
            let engine = engine()?;
            let ok = engine
                .run(
                    &job.handler,
                    &job.operation,
                    job.args,
                    job.priority,
                    job.delay_secs,
                )
                .await;
            if ok {
                println!("Job executed successfully");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("Job execution failed");
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Dispatch(job) => {
            let engine = engine()?;
            let handle = engine
                .run_background(
                    &job.handler,
                    &job.operation,
                    job.args,
                    job.priority,
                    job.delay_secs,
                )
                .await
                .context("failed to dispatch background job")?;
            match handle.pid {
                Some(pid) => println!("Background job started (PID: {})", pid),
                None => println!("Background job started"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::SelfTest => self_test().await,
        Command::Cancel { pid } => {
            terminate(pid).await.context("failed to cancel job")?;
            println!("Job canceled successfully.");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn engine() -> anyhow::Result<JobEngine> {
    let config = EngineConfig::from_env()?;
    Ok(JobEngine::new(config, HandlerRegistry::with_builtins()))
}

async fn self_test() -> anyhow::Result<ExitCode> {
    let engine = engine()?;
    println!("Initializing test runner...");

    engine
        .sink()
        .ensure_files()
        .await
        .context("failed to create log files")?;

    println!("\n--- Testing Simple Method Execution ---");
    let simple = engine
        .run(
            "TestBackgroundJob",
            "simpleMethod",
            vec![json!("test_param1"), json!("test_param2")],
            0,
            0,
        )
        .await;
    println!("Simple Method Result: {}", outcome_label(simple));

    println!("\n--- Testing Failing Method Execution ---");
    let failing = engine
        .run("TestBackgroundJob", "failingMethod", Vec::new(), 0, 0)
        .await;
    println!("Failing Method Result: {}", outcome_label(failing));

    println!("\n--- Log File Locations ---");
    println!("1. {}", engine.sink().lifecycle_path().display());
    println!("2. {}", engine.sink().error_path().display());

    if simple && !failing {
        println!("Background Job Runner Test completed successfully.");
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("Test failed: unexpected job results");
        Ok(ExitCode::FAILURE)
    }
}

fn outcome_label(ok: bool) -> &'static str {
    if ok { "Success" } else { "Failure" }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_run_full() {
        let command = parse_args(&strings(&[
            "background:run",
            "TestBackgroundJob",
            "simpleMethod",
            r#"["a", 2]"#,
            "3",
            "10",
        ]))
        .unwrap();

        assert_eq!(
            command,
            Command::Run(JobArgs {
                handler: "TestBackgroundJob".to_string(),
                operation: "simpleMethod".to_string(),
                args: vec![json!("a"), json!(2)],
                priority: 3,
                delay_secs: 10,
            })
        );
    }

    #[test]
    fn test_parse_run_defaults() {
        let command =
            parse_args(&strings(&["background:run", "TestBackgroundJob", "failingMethod"]))
                .unwrap();
        match command {
            Command::Run(job) => {
                assert!(job.args.is_empty());
                assert_eq!(job.priority, 0);
                assert_eq!(job.delay_secs, 0);
            }
            other => panic!("expected run command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_run_lenient_values() {
        let command = parse_args(&strings(&[
            "background:dispatch",
            "H",
            "op",
            "not json",
            "high",
            "-5",
        ]))
        .unwrap();
        match command {
            Command::Dispatch(job) => {
                assert!(job.args.is_empty());
                assert_eq!(job.priority, 0);
                assert_eq!(job.delay_secs, 0);
            }
            other => panic!("expected dispatch command, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_params_object_is_ignored() {
        assert!(parse_params(Some(r#"{"a":1}"#)).is_empty());
        assert!(parse_params(None).is_empty());
    }

    #[test]
    fn test_parse_missing_operation() {
        let err = parse_args(&strings(&["background:run", "TestBackgroundJob"])).unwrap_err();
        assert_eq!(err, "missing operation name");
    }

    #[test]
    fn test_parse_cancel() {
        assert_eq!(
            parse_args(&strings(&["cancel", "4242"])).unwrap(),
            Command::Cancel { pid: 4242 }
        );
        assert!(parse_args(&strings(&["cancel", "abc"])).is_err());
        assert!(parse_args(&strings(&["cancel"])).is_err());
    }

    #[test]
    fn test_parse_unknown_and_empty() {
        assert!(parse_args(&strings(&["explode"])).is_err());
        assert_eq!(parse_args(&[]).unwrap(), Command::Help);
    }
}
