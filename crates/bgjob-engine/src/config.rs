// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for the job engine.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// File name of the lifecycle log inside the log directory.
pub const LIFECYCLE_LOG_FILE: &str = "background_jobs.log";

/// File name of the error log inside the log directory.
pub const ERROR_LOG_FILE: &str = "background_jobs_errors.log";

/// Default retry ceiling.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the lifecycle and error logs (default: "storage/logs")
    pub log_dir: PathBuf,
    /// How many times a failed attempt is retried (default: 3)
    pub max_retries: u32,
    /// Mirror every event to stdout (default: true)
    pub verbose: bool,
    /// Upper bound on a single attempt. `None` means no limit.
    pub attempt_timeout: Option<Duration>,
    /// Keep the original arguments and priority on retried attempts (default: false).
    /// When false, retries run with no arguments and priority 0.
    pub preserve_retry_args: bool,
    /// Program launched for background jobs. `None` uses the current executable.
    pub program: Option<PathBuf>,
    /// Optional script passed to `program` before the `background:run` command.
    pub entry_script: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("storage/logs"),
            max_retries: DEFAULT_MAX_RETRIES,
            verbose: true,
            attempt_timeout: None,
            preserve_retry_args: false,
            program: None,
            entry_script: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// # Optional Environment Variables
    /// - `BGJOB_LOG_DIR` - Log directory (default: "storage/logs")
    /// - `BGJOB_MAX_RETRIES` - Retry ceiling (default: 3)
    /// - `BGJOB_VERBOSE` - Console mirroring (default: true)
    /// - `BGJOB_ATTEMPT_TIMEOUT_SECS` - Per-attempt timeout (default: none)
    /// - `BGJOB_PRESERVE_RETRY_ARGS` - Keep args on retry (default: false)
    /// - `BGJOB_PROGRAM` - Program for background jobs (default: current executable)
    /// - `BGJOB_ENTRY_SCRIPT` - Script argument placed before `background:run`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let log_dir = env::var("BGJOB_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.log_dir);

        let max_retries = match env::var("BGJOB_MAX_RETRIES") {
            Ok(v) => v
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue("BGJOB_MAX_RETRIES", v))?,
            Err(_) => defaults.max_retries,
        };

        let verbose = env::var("BGJOB_VERBOSE")
            .map(|v| parse_flag(&v))
            .unwrap_or(defaults.verbose);

        let attempt_timeout = match env::var("BGJOB_ATTEMPT_TIMEOUT_SECS") {
            Ok(v) => {
                let secs: u64 = v
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("BGJOB_ATTEMPT_TIMEOUT_SECS", v))?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            Err(_) => None,
        };

        let preserve_retry_args = env::var("BGJOB_PRESERVE_RETRY_ARGS")
            .map(|v| parse_flag(&v))
            .unwrap_or(false);

        let program = env::var("BGJOB_PROGRAM").ok().map(PathBuf::from);
        let entry_script = env::var("BGJOB_ENTRY_SCRIPT").ok().map(PathBuf::from);

        Ok(Self {
            log_dir,
            max_retries,
            verbose,
            attempt_timeout,
            preserve_retry_args,
            program,
            entry_script,
        })
    }

    /// Set the log directory.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Set the retry ceiling.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Enable or disable console mirroring.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Bound every attempt by `timeout`.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Keep arguments and priority across retries.
    pub fn with_preserve_retry_args(mut self, preserve: bool) -> Self {
        self.preserve_retry_args = preserve;
        self
    }

    /// Set the program launched for background jobs.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Set the script argument placed before `background:run`.
    pub fn with_entry_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.entry_script = Some(script.into());
        self
    }

    /// Path of the lifecycle log.
    pub fn lifecycle_log_path(&self) -> PathBuf {
        self.log_dir.join(LIFECYCLE_LOG_FILE)
    }

    /// Path of the error log.
    pub fn error_log_path(&self) -> PathBuf {
        self.log_dir.join(ERROR_LOG_FILE)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable holds a value that cannot be parsed.
    #[error("Invalid value for {0}: {1:?}")]
    InvalidValue(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "BGJOB_LOG_DIR",
        "BGJOB_MAX_RETRIES",
        "BGJOB_VERBOSE",
        "BGJOB_ATTEMPT_TIMEOUT_SECS",
        "BGJOB_PRESERVE_RETRY_ARGS",
        "BGJOB_PROGRAM",
        "BGJOB_ENTRY_SCRIPT",
    ];

    fn clear_env() {
        for var in VARS {
            // SAFETY: tests touching the environment are serialized.
            unsafe { env::remove_var(var) };
        }
    }

    #[test]
    #[serial]
    fn test_defaults_from_empty_env() {
        clear_env();
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.log_dir, PathBuf::from("storage/logs"));
        assert_eq!(config.max_retries, 3);
        assert!(config.verbose);
        assert!(config.attempt_timeout.is_none());
        assert!(!config.preserve_retry_args);
        assert!(config.program.is_none());
    }

    #[test]
    #[serial]
    fn test_values_from_env() {
        clear_env();
        unsafe {
            env::set_var("BGJOB_LOG_DIR", "/tmp/bgjob-logs");
            env::set_var("BGJOB_MAX_RETRIES", "5");
            env::set_var("BGJOB_VERBOSE", "false");
            env::set_var("BGJOB_ATTEMPT_TIMEOUT_SECS", "30");
            env::set_var("BGJOB_PRESERVE_RETRY_ARGS", "1");
        }

        let config = EngineConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.log_dir, PathBuf::from("/tmp/bgjob-logs"));
        assert_eq!(config.max_retries, 5);
        assert!(!config.verbose);
        assert_eq!(config.attempt_timeout, Some(Duration::from_secs(30)));
        assert!(config.preserve_retry_args);
    }

    #[test]
    #[serial]
    fn test_invalid_max_retries() {
        clear_env();
        unsafe { env::set_var("BGJOB_MAX_RETRIES", "many") };
        let result = EngineConfig::from_env();
        clear_env();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue("BGJOB_MAX_RETRIES", _))
        ));
    }

    #[test]
    fn test_log_paths() {
        let config = EngineConfig::default().with_log_dir("/var/log/jobs");
        assert_eq!(
            config.lifecycle_log_path(),
            PathBuf::from("/var/log/jobs/background_jobs.log")
        );
        assert_eq!(
            config.error_log_path(),
            PathBuf::from("/var/log/jobs/background_jobs_errors.log")
        );
    }

    #[test]
    fn test_builder_pattern() {
        let config = EngineConfig::default()
            .with_max_retries(1)
            .with_verbose(false)
            .with_attempt_timeout(Duration::from_secs(2))
            .with_program("/usr/local/bin/bgjob");

        assert_eq!(config.max_retries, 1);
        assert!(!config.verbose);
        assert_eq!(config.attempt_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.program, Some(PathBuf::from("/usr/local/bin/bgjob")));
    }
}
