//! Execution of launcher command lines.
//!
//! [`ShellRunner`] hands the rendered command line to `sh -c` through
//! `tokio::process::Command`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Output of a finished command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub stdout: String,
    pub stderr: String,
    /// Exit code (0 = success, non-zero = failure)
    pub exit_code: i32,
    pub duration: Duration,
}

impl JobOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A rendered command line and where to run it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCommand {
    pub command_line: String,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Maximum execution time (None = no timeout)
    pub timeout: Option<Duration>,
}

impl JobCommand {
    pub fn new(command_line: impl Into<String>) -> Self {
        Self {
            command_line: command_line.into(),
            working_dir: None,
            env: HashMap::new(),
            timeout: None,
        }
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Run was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Runs launcher commands
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(
        &self,
        cmd: JobCommand,
        cancel: CancellationToken,
    ) -> Result<JobOutcome, RunnerError>;

    fn runner_type(&self) -> &'static str;
}

/// Runs commands through the host shell
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobRunner for ShellRunner {
    async fn run(
        &self,
        cmd: JobCommand,
        cancel: CancellationToken,
    ) -> Result<JobOutcome, RunnerError> {
        debug!("Running on host: {}", cmd.command_line);

        let start = Instant::now();

        let mut command = Command::new("sh");
        command.arg("-c").arg(&cmd.command_line).kill_on_drop(true);

        if let Some(ref dir) = cmd.working_dir {
            command.current_dir(dir);
        }

        for (key, value) in &cmd.env {
            command.env(key, value);
        }

        let run = async {
            match cmd.timeout {
                Some(timeout) => match tokio::time::timeout(timeout, command.output()).await {
                    Ok(result) => result.map_err(RunnerError::from),
                    Err(_) => Err(RunnerError::Timeout(timeout)),
                },
                None => command.output().await.map_err(RunnerError::from),
            }
        };

        // Dropping the output future kills the child
        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(RunnerError::Cancelled),
            result = run => result?,
        };

        Ok(JobOutcome {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        })
    }

    fn runner_type(&self) -> &'static str {
        "shell"
    }
}
