//! Job execution traits
//!
//! The pool is decoupled from how work is performed: anything implementing
//! [`JobExecutor`] can run its jobs.

use async_trait::async_trait;

use crate::worker::{Job, JobResult};

/// Runs one job to completion.
///
/// Implementations must be total: every call returns a [`JobResult`] for the
/// given job, failures included. Errors are reported through
/// `success = false`, never by panicking or by dropping the job.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Executes a job and returns its result
    async fn execute(&self, job: &Job) -> JobResult;
}
