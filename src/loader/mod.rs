//! # Directory table loader
//!
//! Turns an input path into one `COPY BINARY` job per file and runs the
//! jobs on a [`WorkerPool`]:
//!
//! 1. collect the input files
//! 2. resolve the password and check the connection
//! 3. submit one job per file, wait, report failures
//!
//! The pool is halted and its workers joined on every path out of
//! [`DirTableLoader::load_files`].

mod connection;
mod copy;
mod errors;
mod files;

pub use connection::{
    FailureKind, MAX_PASSWORD_PROMPTS, RetryPolicy, classify_failure, establish_connection,
};
pub use copy::{CopyStatement, LoadCommandBuilder, destination_for, quote_literal};
pub use errors::{LoadError, LoadResult};
pub use files::{InputFiles, InputMode, collect_input_files};

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::executor::{JobExecutor, ShellExecutor};
use crate::infrastructure::{
    Environment, LoadConfig, PasswordPrompt, RunContext, TerminalPrompt, resolve_password,
};
use crate::worker::{Job, JobId, PoolConfig, PoolError, WorkerPool};

/// Process exit status of a load run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Everything loaded
    Success = 0,
    /// Loaded, but something deserves attention
    Warnings = 1,
    /// Something failed
    Failure = 2,
}

impl ExitStatus {
    /// Numeric exit code
    #[must_use]
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        Self::from(status.code())
    }
}

/// What a load run did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadSummary {
    /// Files found under the input path
    pub files: usize,
    /// Workers used
    pub workers: usize,
    /// Files loaded
    pub loaded: usize,
    /// Files that failed to load
    pub failed: usize,
    /// Loaded files whose client reported something on stderr
    pub warnings: usize,
    /// Server version reported by the connection check
    pub server_version: Option<String>,
    /// Wall-clock time in seconds
    pub elapsed_secs: f64,
}

impl LoadSummary {
    /// Exit status this run maps to
    #[must_use]
    pub fn exit_status(&self) -> ExitStatus {
        if self.failed > 0 {
            ExitStatus::Failure
        } else if self.files == 0 || self.warnings > 0 {
            ExitStatus::Warnings
        } else {
            ExitStatus::Success
        }
    }
}

/// Loads files into a directory table
pub struct DirTableLoader {
    config: LoadConfig,
    env: Environment,
    ctx: RunContext,
    executor: Arc<dyn JobExecutor>,
    prompt: Arc<dyn PasswordPrompt>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for DirTableLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirTableLoader")
            .field("config", &self.config)
            .field("retry", &self.retry)
            .field("killed", &self.ctx.is_killed())
            .finish_non_exhaustive()
    }
}

impl DirTableLoader {
    /// Creates a loader that runs psql as child processes
    #[must_use]
    pub fn new(config: LoadConfig, env: Environment, ctx: RunContext) -> Self {
        let retry = RetryPolicy::new(config.max_retries);
        Self {
            config,
            env,
            ctx,
            executor: Arc::new(ShellExecutor::new()),
            prompt: Arc::new(TerminalPrompt),
            retry,
        }
    }

    /// Replaces the job executor
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn JobExecutor>) -> Self {
        self.executor = executor;
        self
    }

    /// Replaces the password prompt
    #[must_use]
    pub fn with_prompt(mut self, prompt: Arc<dyn PasswordPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Replaces the connection retry policy
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Runs the whole load.
    ///
    /// # Errors
    ///
    /// Configuration, input and connection problems abort before any file
    /// is loaded. `JobFailure` reports files that failed to load,
    /// `Interrupted` a run stopped by a signal.
    pub async fn run(&self) -> LoadResult<LoadSummary> {
        self.config.validate()?;
        self.check_killed()?;
        let started = Instant::now();

        let input = collect_input_files(&self.config.input)?;
        if input.is_empty() {
            warn!("no files to load under {}", input.root.display());
            return Ok(LoadSummary::default());
        }
        let workers = self.config.worker_count(input.len());
        debug!("found {} files, using {} workers", input.len(), workers);

        let env_script = self.env.client_env_script()?;
        let mut builder = LoadCommandBuilder::new(env_script, self.config.target.clone());
        builder.set_password(resolve_password(
            &self.env,
            &self.config.target,
            self.config.force_password_auth,
            self.prompt.as_ref(),
        )?);
        self.check_killed()?;

        let version = establish_connection(
            self.executor.as_ref(),
            &mut builder,
            &self.retry,
            self.prompt.as_ref(),
            &self.ctx,
        )
        .await?;

        let mut summary = self.load_files(&builder, &input, workers).await?;
        summary.server_version = Some(version);
        summary.elapsed_secs = started.elapsed().as_secs_f64();
        info!("running time: {:.2} seconds", summary.elapsed_secs);
        Ok(summary)
    }

    /// Loads `input` with `workers` concurrent jobs.
    ///
    /// # Errors
    ///
    /// `JobFailure` if any file failed, `Interrupted` if a signal arrived,
    /// `Pool` if the pool cannot be built.
    pub async fn load_files(
        &self,
        builder: &LoadCommandBuilder,
        input: &InputFiles,
        workers: usize,
    ) -> LoadResult<LoadSummary> {
        let mut pool = WorkerPool::new(
            PoolConfig::new(workers, self.config.stop_on_error),
            Arc::clone(&self.executor),
        )?;

        let outcome = self.dispatch(&mut pool, builder, input).await;

        pool.halt();
        let joined = pool.join_workers().await;
        let summary = outcome?;
        joined?;
        Ok(summary)
    }

    async fn dispatch(
        &self,
        pool: &mut WorkerPool,
        builder: &LoadCommandBuilder,
        input: &InputFiles,
    ) -> LoadResult<LoadSummary> {
        let mut files: HashMap<JobId, &PathBuf> = HashMap::with_capacity(input.len());
        for file in &input.files {
            let statement = CopyStatement {
                table: &self.config.table,
                source: file,
                destination: destination_for(input, file, self.config.dest_path.as_deref()),
                tag: self.config.tag.as_deref(),
            };
            debug!("{}", statement);
            match pool.submit(Job::new(builder.copy_command(&statement))) {
                Ok(id) => {
                    files.insert(id, file);
                }
                Err(PoolError::Halted { .. }) => break,
                Err(e) => return Err(e.into()),
            }
        }

        let handle = pool.handle();
        let interrupted = tokio::select! {
            () = pool.join() => None,
            signum = self.ctx.killed() => {
                handle.halt();
                Some(signum)
            }
        };
        if interrupted.is_some() {
            pool.join().await;
        }

        let mut summary = LoadSummary {
            files: input.len(),
            workers: pool.worker_count(),
            ..LoadSummary::default()
        };
        for result in pool.completed_items() {
            let file = files
                .get(&result.job_id)
                .map_or_else(|| result.job_id.to_string(), |f| f.display().to_string());
            let stderr = result.stderr.trim();
            if result.is_failure() {
                summary.failed += 1;
                error!(
                    "failed load file {} to directory table {}, msg:{}",
                    file, self.config.table, stderr
                );
            } else {
                summary.loaded += 1;
                if stderr.is_empty() {
                    debug!("loaded {}", file);
                } else {
                    summary.warnings += 1;
                    warn!("loaded {} with messages: {}", file, stderr);
                }
            }
        }
        debug!(
            "load summary: {}",
            serde_json::to_string(&summary).unwrap_or_default()
        );

        if let Some(signum) = interrupted {
            return Err(LoadError::Interrupted(signum));
        }
        pool.check_results()
            .map_err(|source| LoadError::JobFailure {
                table: self.config.table.clone(),
                source,
            })?;
        Ok(summary)
    }

    fn check_killed(&self) -> LoadResult<()> {
        match self.ctx.received_signal() {
            Some(signum) => Err(LoadError::Interrupted(signum)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod loader_tests;
