//! Jobs and job results.
//!
//! A [`Job`] is an immutable description of one unit of work. Running it
//! produces exactly one [`JobResult`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::process::Output;
use uuid::Uuid;

/// Exit code reported for jobs whose command never produced an exit status
/// (spawn failure, timeout, executor panic, death by signal).
pub const NO_EXIT_STATUS: i32 = -1;

/// Job identifier, unique within a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Creates a fresh random identifier
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A structured command: program, arguments and extra environment.
///
/// `Debug` only prints environment variable names, values may hold
/// credentials.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to run
    pub program: String,
    /// Arguments, passed verbatim (no shell splitting)
    pub args: Vec<String>,
    /// Extra environment for the child process
    pub env: BTreeMap<String, String>,
    /// Human-readable label used in logs
    pub label: String,
}

impl CommandSpec {
    /// Creates a command for `program` with no arguments
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        Self {
            label: program.clone(),
            program,
            ..Self::default()
        }
    }

    /// Appends one argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable for the child
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the log label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Renders the command line with shell quoting, for logging only
    #[must_use]
    pub fn display_line(&self) -> String {
        shell_words::join(std::iter::once(&self.program).chain(self.args.iter()))
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("label", &self.label)
            .finish()
    }
}

/// A unit of work submitted to the pool. Immutable once created.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    command: CommandSpec,
    submitted_at: DateTime<Utc>,
}

impl Job {
    /// Creates a job with a fresh identifier
    #[must_use]
    pub fn new(command: CommandSpec) -> Self {
        Self::with_id(JobId::new(), command)
    }

    /// Creates a job with a caller-chosen identifier
    #[must_use]
    pub fn with_id(id: JobId, command: CommandSpec) -> Self {
        Self {
            id,
            command,
            submitted_at: Utc::now(),
        }
    }

    /// Job identifier
    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Command to execute
    #[must_use]
    pub fn command(&self) -> &CommandSpec {
        &self.command
    }

    /// Creation time
    #[must_use]
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }
}

/// Outcome of executing one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Job this result belongs to
    pub job_id: JobId,
    /// Whether the job succeeded
    pub success: bool,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Exit code, [`NO_EXIT_STATUS`] when there was none
    pub exit_code: i32,
    /// When execution started
    pub started_at: DateTime<Utc>,
    /// When execution finished
    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    /// Builds a result from an exit code; zero means success
    #[must_use]
    pub fn from_exit(
        job_id: JobId,
        started_at: DateTime<Utc>,
        exit_code: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            job_id,
            success: exit_code == 0,
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Builds a result from a finished child process
    #[must_use]
    pub fn from_output(job_id: JobId, started_at: DateTime<Utc>, output: &Output) -> Self {
        let exit_code = output.status.code().unwrap_or(NO_EXIT_STATUS);
        Self {
            success: output.status.success(),
            ..Self::from_exit(
                job_id,
                started_at,
                exit_code,
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr),
            )
        }
    }

    /// Builds a failed result for a job that produced no exit status
    #[must_use]
    pub fn failure(job_id: JobId, started_at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self::from_exit(job_id, started_at, NO_EXIT_STATUS, String::new(), reason)
    }

    /// Returns true if the job succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Returns true if the job failed
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !self.success
    }

    /// Wall-clock execution time
    #[must_use]
    pub fn duration(&self) -> std::time::Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_are_unique() {
        let a = Job::new(CommandSpec::new("true"));
        let b = Job::new(CommandSpec::new("true"));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_command_spec_builder() {
        let spec = CommandSpec::new("psql")
            .arg("-d")
            .args(["gpadmin", "-c"])
            .env("PGPASSWORD", "secret")
            .with_label("load a.bin");

        assert_eq!(spec.program, "psql");
        assert_eq!(spec.args, vec!["-d", "gpadmin", "-c"]);
        assert_eq!(spec.env.get("PGPASSWORD").map(String::as_str), Some("secret"));
        assert_eq!(spec.label, "load a.bin");
    }

    #[test]
    fn test_command_spec_debug_hides_env_values() {
        let spec = CommandSpec::new("psql").env("PGPASSWORD", "hunter2");
        let debug = format!("{spec:?}");
        assert!(debug.contains("PGPASSWORD"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_display_line_quotes_arguments() {
        let spec = CommandSpec::new("psql").args(["-c", "COPY BINARY t FROM 'a b'"]);
        let line = spec.display_line();
        assert!(line.starts_with("psql -c "));
        assert_eq!(
            shell_words::split(&line).unwrap(),
            vec!["psql", "-c", "COPY BINARY t FROM 'a b'"]
        );
    }

    #[test]
    fn test_result_from_exit() {
        let id = JobId::new();
        let ok = JobResult::from_exit(id, Utc::now(), 0, "out", "");
        assert!(ok.is_success());
        assert_eq!(ok.job_id, id);

        let failed = JobResult::from_exit(id, Utc::now(), 3, "", "boom");
        assert!(failed.is_failure());
        assert_eq!(failed.exit_code, 3);
    }

    #[test]
    fn test_result_failure_has_no_exit_status() {
        let result = JobResult::failure(JobId::new(), Utc::now(), "could not spawn");
        assert!(result.is_failure());
        assert_eq!(result.exit_code, NO_EXIT_STATUS);
        assert_eq!(result.stderr, "could not spawn");
    }
}
