//! # Worker pool
//!
//! Bounded concurrent job runner with fail-fast semantics. This module does
//! not know what a job does: jobs carry a [`CommandSpec`] and are run by any
//! [`JobExecutor`](crate::executor::JobExecutor).
//!
//! ## Architecture
//!
//! - `job`: jobs and their results
//! - `queue`: the shared pending/completed state
//! - `pool`: workers and the pool that owns them
//! - `state`: counters snapshot
//!
//! ## Example
//!
//! ```rust,ignore
//! use gpdirtableload::executor::ShellExecutor;
//! use gpdirtableload::worker::{CommandSpec, Job, PoolConfig, WorkerPool};
//!
//! let mut pool = WorkerPool::new(PoolConfig::new(4, true), Arc::new(ShellExecutor::new()))?;
//! pool.submit(Job::new(CommandSpec::new("true")))?;
//! pool.join().await;
//! let results = pool.completed_items();
//! pool.halt();
//! pool.join_workers().await?;
//! ```

mod job;
mod pool;
mod queue;
mod state;


pub use job::{CommandSpec, Job, JobId, JobResult, NO_EXIT_STATUS};
pub use pool::{PoolConfig, PoolHandle, WorkerId, WorkerPool, panic_message};
pub use state::PoolStats;

/// Worker pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The pool cannot be built with this configuration
    #[error("invalid pool configuration: {reason}")]
    InvalidConfig {
        /// What was wrong
        reason: String,
    },

    /// The pool is halted and accepts no more jobs
    #[error("pool is halted, job {job_id} was not accepted")]
    Halted {
        /// The rejected job
        job_id: JobId,
    },

    /// A job with this id was already submitted
    #[error("job {job_id} was already submitted")]
    DuplicateJob {
        /// The rejected job
        job_id: JobId,
    },

    /// `join_workers` was called before `halt`
    #[error("workers can only be joined after the pool is halted")]
    NotHalted,

    /// At least one job failed
    #[error(
        "{failed} of {total} jobs failed; first failure: job {job_id} exited with code {exit_code}: {stderr}"
    )]
    PartialFailure {
        /// Number of failed results
        failed: usize,
        /// Number of collected results
        total: usize,
        /// First failed job
        job_id: JobId,
        /// Its exit code
        exit_code: i32,
        /// Its standard error
        stderr: String,
    },
}

/// Worker pool result type
pub type PoolResult<T = ()> = Result<T, PoolError>;
