//! Child-process execution
//!
//! [`ShellExecutor`] runs a job's [`CommandSpec`](crate::worker::CommandSpec)
//! as a child process and captures its output:
//!
//! - arguments are passed verbatim, nothing is re-split by a shell
//! - stdin is closed, stdout and stderr are captured
//! - the child is killed if the job future is dropped
//! - an optional timeout turns a hung command into a failed result

use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::traits::JobExecutor;
use crate::worker::{Job, JobResult};

/// Process execution configuration
#[derive(Debug, Clone, Default)]
pub struct ShellConfig {
    /// Working directory, inherited when `None`
    pub cwd: Option<PathBuf>,

    /// Timeout for each command (None = no timeout)
    pub timeout: Option<Duration>,
}

/// Executor that spawns each job as a child process
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    config: ShellConfig,
}

impl ShellExecutor {
    /// Creates an executor with no timeout
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an executor from a configuration
    #[must_use]
    pub fn with_config(config: ShellConfig) -> Self {
        Self { config }
    }

    /// Sets a per-command timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Sets the working directory
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.config.cwd = Some(cwd.into());
        self
    }
}

#[async_trait]
impl JobExecutor for ShellExecutor {
    async fn execute(&self, job: &Job) -> JobResult {
        let spec = job.command();
        let started_at = Utc::now();

        tracing::debug!(job = %job.id(), command = %spec.display_line(), "Executing command");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.config.cwd {
            cmd.current_dir(cwd);
        }

        let output = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(output) => output,
                Err(_) => {
                    return JobResult::failure(
                        job.id(),
                        started_at,
                        format!("{} timed out after {:?}", spec.label, limit),
                    );
                }
            },
            None => cmd.output().await,
        };

        match output {
            Ok(output) => {
                let result = JobResult::from_output(job.id(), started_at, &output);
                tracing::debug!(
                    job = %job.id(),
                    exit_code = result.exit_code,
                    duration_ms = result.duration().as_millis(),
                    "Command finished"
                );
                result
            }
            Err(e) => JobResult::failure(
                job.id(),
                started_at,
                format!("failed to run {}: {}", spec.program, e),
            ),
        }
    }
}
