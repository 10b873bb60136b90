// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process dispatcher - launches background jobs as detached processes.
//!
//! A background job is a new OS process running the engine's synchronous
//! entry point:
//!
//! ```text
//! <program> [<entry-script>] background:run <handler> <operation> <json-args> <priority> <delay>
//! ```
//!
//! The command is built as an argument vector and launched without a shell,
//! so argument values are never re-parsed. The child gets null stdio and is
//! detached from the parent (own process group on Unix, `DETACHED_PROCESS`
//! on Windows). The parent does not wait for it; the job's outcome is only
//! visible through the shared log files.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::types::InvocationRequest;

/// Command the child process runs.
pub const RUN_COMMAND: &str = "background:run";

/// How long a freshly launched child is watched for an immediate exit.
///
/// A child that exits non-zero inside this window is reported as
/// [`SpawnError::StartFailed`], even when it got as far as running its job.
pub const STARTUP_CHECK_WINDOW: Duration = Duration::from_millis(100);

/// Errors from launching or terminating processes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SpawnError {
    /// Program executable was not found.
    #[error("Program not found: {0}")]
    ProgramNotFound(String),

    /// The program exists but may not be executed.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The process exited with a failure right after launch.
    #[error("Process start failed: {0}")]
    StartFailed(String),

    /// The process could not be terminated.
    #[error("Failed to terminate process {pid}: {reason}")]
    Terminate {
        /// Target process id.
        pid: u32,
        /// Why termination failed.
        reason: String,
    },

    /// Arguments could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Detach strategy in use on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// New process group, null stdio.
    Unix,
    /// `DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP`, null stdio.
    Windows,
}

impl Platform {
    /// Strategy for the host this binary was built for.
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

/// What the child process executes.
#[derive(Debug, Clone)]
pub struct EntryPoint {
    /// Program to launch
    pub program: PathBuf,
    /// Optional script passed before the run command
    pub script: Option<PathBuf>,
    /// Environment variables set on the child (on top of the inherited ones)
    pub env: HashMap<String, String>,
}

impl EntryPoint {
    /// Launch `program` directly.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            script: None,
            env: HashMap::new(),
        }
    }

    /// Entry point described by `config`.
    ///
    /// Falls back to the current executable when no program is configured.
    /// The child is pointed at the same log directory and retry settings.
    pub fn from_config(config: &EngineConfig) -> io::Result<Self> {
        let program = match &config.program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };

        let mut entry = Self::new(program);
        entry.script = config.entry_script.clone();
        entry.env.insert(
            "BGJOB_LOG_DIR".to_string(),
            config.log_dir.to_string_lossy().into_owned(),
        );
        entry
            .env
            .insert("BGJOB_MAX_RETRIES".to_string(), config.max_retries.to_string());
        entry.env.insert(
            "BGJOB_PRESERVE_RETRY_ARGS".to_string(),
            config.preserve_retry_args.to_string(),
        );
        if let Some(timeout) = config.attempt_timeout {
            entry.env.insert(
                "BGJOB_ATTEMPT_TIMEOUT_SECS".to_string(),
                timeout.as_secs().to_string(),
            );
        }
        Ok(entry)
    }

    /// Pass `script` before the run command.
    pub fn with_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.script = Some(script.into());
        self
    }

    /// Set an environment variable on the child.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Argument vector for the child process (everything after the program).
pub fn build_arguments(
    entry: &EntryPoint,
    request: &InvocationRequest,
) -> Result<Vec<OsString>, SpawnError> {
    let mut args: Vec<OsString> = Vec::with_capacity(7);
    if let Some(script) = &entry.script {
        args.push(script.clone().into_os_string());
    }
    args.push(RUN_COMMAND.into());
    args.push(request.handler.clone().into());
    args.push(request.operation.clone().into());
    args.push(serde_json::to_string(&request.args)?.into());
    args.push(request.priority.to_string().into());
    args.push(request.delay_secs.to_string().into());
    Ok(args)
}

/// Handle for a launched background job.
#[derive(Debug, Clone)]
pub struct SpawnHandle {
    /// Process id of the child, when the OS reported one
    pub pid: Option<u32>,
    /// Handler the child runs
    pub handler: String,
    /// Operation the child runs
    pub operation: String,
    /// When the child was launched
    pub started_at: DateTime<Utc>,
    /// Detach strategy used
    pub platform: Platform,
}

/// Launches detached processes that re-enter the engine.
#[derive(Debug, Clone)]
pub struct ProcessDispatcher {
    entry: EntryPoint,
}

impl ProcessDispatcher {
    /// Create a dispatcher launching `entry`.
    pub fn new(entry: EntryPoint) -> Self {
        Self { entry }
    }

    /// The entry point children run.
    pub fn entry(&self) -> &EntryPoint {
        &self.entry
    }

    /// Build the fully configured command for `request` without launching it.
    pub fn command(
        &self,
        request: &InvocationRequest,
    ) -> Result<std::process::Command, SpawnError> {
        let mut cmd = std::process::Command::new(&self.entry.program);
        cmd.args(build_arguments(&self.entry, request)?)
            .envs(&self.entry.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut cmd);
        Ok(cmd)
    }

    /// Launch `request` in a detached process and return without waiting.
    ///
    /// Success means the process started; the job itself may still fail.
    pub async fn spawn(&self, request: &InvocationRequest) -> Result<SpawnHandle, SpawnError> {
        let program = self.entry.program.display().to_string();
        let mut cmd = tokio::process::Command::from(self.command(request)?);

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SpawnError::ProgramNotFound(program.clone()),
            io::ErrorKind::PermissionDenied => SpawnError::PermissionDenied(program.clone()),
            _ => SpawnError::Io(e),
        })?;
        let pid = child.id();

        // Check for immediate startup failures
        match tokio::time::timeout(STARTUP_CHECK_WINDOW, child.wait()).await {
            Ok(Ok(status)) if !status.success() => {
                return Err(SpawnError::StartFailed(format!(
                    "{} exited with status: {}",
                    program, status
                )));
            }
            Ok(Ok(_status)) => {
                info!(
                    handler = %request.handler,
                    operation = %request.operation,
                    "Background job exited immediately"
                );
            }
            Ok(Err(e)) => {
                warn!(
                    handler = %request.handler,
                    error = %e,
                    "Could not check background job status"
                );
            }
            Err(_) => {
                info!(
                    handler = %request.handler,
                    operation = %request.operation,
                    pid = ?pid,
                    "Launched background job (detached)"
                );
            }
        }

        // Dropping the child neither waits on nor kills it; the runtime reaps it on exit.
        Ok(SpawnHandle {
            pid,
            handler: request.handler.clone(),
            operation: request.operation.clone(),
            started_at: Utc::now(),
            platform: Platform::current(),
        })
    }
}

#[cfg(unix)]
fn detach(cmd: &mut std::process::Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(windows)]
fn detach(cmd: &mut std::process::Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

/// Forcefully terminate process `pid`.
#[cfg(unix)]
pub async fn terminate(pid: u32) -> Result<(), SpawnError> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| SpawnError::Terminate {
        pid,
        reason: "pid out of range".to_string(),
    })?;

    kill(Pid::from_raw(raw), Signal::SIGKILL).map_err(|e| SpawnError::Terminate {
        pid,
        reason: e.to_string(),
    })?;

    info!(pid, "Terminated process");
    Ok(())
}

/// Forcefully terminate process `pid`.
#[cfg(windows)]
pub async fn terminate(pid: u32) -> Result<(), SpawnError> {
    let output = tokio::process::Command::new("taskkill")
        .arg("/PID")
        .arg(pid.to_string())
        .arg("/F")
        .output()
        .await?;

    if !output.status.success() {
        return Err(SpawnError::Terminate {
            pid,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    info!(pid, "Terminated process");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> InvocationRequest {
        InvocationRequest::new("TestBackgroundJob", "simpleMethod")
            .with_args(vec![json!("a"), json!("b")])
            .with_priority(2)
            .with_delay_secs(5)
    }

    #[test]
    fn test_build_arguments() {
        let entry = EntryPoint::new("/usr/bin/bgjob");
        let args = build_arguments(&entry, &request()).unwrap();
        assert_eq!(
            args,
            vec![
                OsString::from("background:run"),
                OsString::from("TestBackgroundJob"),
                OsString::from("simpleMethod"),
                OsString::from(r#"["a","b"]"#),
                OsString::from("2"),
                OsString::from("5"),
            ]
        );
    }

    #[test]
    fn test_build_arguments_with_script() {
        let entry = EntryPoint::new("/usr/bin/php").with_script("/srv/app/artisan");
        let args = build_arguments(&entry, &request()).unwrap();
        assert_eq!(args[0], OsString::from("/srv/app/artisan"));
        assert_eq!(args[1], OsString::from("background:run"));
        assert_eq!(args.len(), 7);
    }

    #[test]
    fn test_hostile_values_stay_single_arguments() {
        let hostile = r#"x"; rm -rf / #"#;
        let req = InvocationRequest::new(hostile, "$(reboot)")
            .with_args(vec![json!("`id` && echo pwned"), json!("a b\"c")]);
        let args = build_arguments(&EntryPoint::new("bgjob"), &req).unwrap();

        assert_eq!(args.len(), 6);
        assert_eq!(args[1], OsString::from(hostile));
        assert_eq!(args[2], OsString::from("$(reboot)"));
        let decoded: Vec<serde_json::Value> =
            serde_json::from_str(args[3].to_str().unwrap()).unwrap();
        assert_eq!(decoded, req.args);
    }

    #[test]
    fn test_command_carries_env_and_args() {
        let entry = EntryPoint::new("/opt/bgjob").with_env("BGJOB_LOG_DIR", "/tmp/logs");
        let cmd = ProcessDispatcher::new(entry).command(&request()).unwrap();

        assert_eq!(cmd.get_program(), "/opt/bgjob");
        assert_eq!(cmd.get_args().count(), 6);
        let log_dir = cmd
            .get_envs()
            .find(|(key, _)| *key == "BGJOB_LOG_DIR")
            .and_then(|(_, value)| value);
        assert_eq!(log_dir, Some(std::ffi::OsStr::new("/tmp/logs")));
    }

    #[test]
    fn test_entry_point_from_config() {
        let config = EngineConfig::default()
            .with_log_dir("/data/logs")
            .with_max_retries(7)
            .with_program("/opt/bgjob");
        let entry = EntryPoint::from_config(&config).unwrap();

        assert_eq!(entry.program, PathBuf::from("/opt/bgjob"));
        assert_eq!(entry.env.get("BGJOB_LOG_DIR").unwrap(), "/data/logs");
        assert_eq!(entry.env.get("BGJOB_MAX_RETRIES").unwrap(), "7");
        assert!(!entry.env.contains_key("BGJOB_ATTEMPT_TIMEOUT_SECS"));
    }

    #[test]
    fn test_platform_current() {
        #[cfg(unix)]
        assert_eq!(Platform::current(), Platform::Unix);
        #[cfg(windows)]
        assert_eq!(Platform::current(), Platform::Windows);
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let dispatcher = ProcessDispatcher::new(EntryPoint::new(
            "/nonexistent/path/to/bgjob-binary-that-does-not-exist",
        ));
        let err = dispatcher.spawn(&request()).await.unwrap_err();
        assert!(matches!(err, SpawnError::ProgramNotFound(_)));
    }
}
