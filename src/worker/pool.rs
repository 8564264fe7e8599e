//! Worker pool management.
//!
//! A [`WorkerPool`] runs a fixed number of workers on the current tokio
//! runtime. Each worker claims jobs from the shared FIFO one at a time, so at
//! most `worker_count` jobs ever execute concurrently.

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::job::{Job, JobId, JobResult};
use super::queue::{Claim, JobQueue};
use super::state::PoolStats;
use super::{PoolError, PoolResult};
use crate::executor::JobExecutor;

/// Worker identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub usize);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Pool configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of workers, fixed for the pool's lifetime
    pub worker_count: usize,
    /// Stop claiming jobs after the first failed result
    pub stop_on_error: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            stop_on_error: false,
        }
    }
}

impl PoolConfig {
    /// Creates a configuration
    #[must_use]
    pub fn new(worker_count: usize, stop_on_error: bool) -> Self {
        Self {
            worker_count,
            stop_on_error,
        }
    }

    fn validate(&self) -> PoolResult {
        if self.worker_count == 0 {
            return Err(PoolError::InvalidConfig {
                reason: "worker_count must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// A single worker loop
struct Worker {
    id: WorkerId,
    queue: Arc<JobQueue>,
    executor: Arc<dyn JobExecutor>,
    stop_on_error: bool,
}

impl Worker {
    async fn run(self) {
        debug!("{} starting", self.id);

        loop {
            // Registered before looking at the queue so a submit or halt
            // racing with the check is not missed.
            let woken = self.queue.work_ready().notified();
            match self.queue.claim() {
                Claim::Job(job) => {
                    drop(woken);
                    let result = self.execute(&job).await;
                    let failed = result.is_failure();
                    if self.queue.finish(result, self.stop_on_error) {
                        warn!(
                            "{}: job {} failed, no further jobs will be started",
                            self.id,
                            job.id()
                        );
                    } else if failed {
                        debug!("{}: job {} failed", self.id, job.id());
                    }
                }
                Claim::Idle => woken.await,
                Claim::Halted => break,
            }
        }

        debug!("{} stopping", self.id);
    }

    async fn execute(&self, job: &Job) -> JobResult {
        let started_at = Utc::now();
        debug!("{} executing job {} ({})", self.id, job.id(), job.command().label);

        let outcome = AssertUnwindSafe(self.executor.execute(job))
            .catch_unwind()
            .await;

        match outcome {
            Ok(mut result) => {
                if result.job_id != job.id() {
                    warn!(
                        "{}: executor reported job {} for job {}",
                        self.id,
                        result.job_id,
                        job.id()
                    );
                    result.job_id = job.id();
                }
                result
            }
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                warn!("{}: executor panicked on job {}: {}", self.id, job.id(), reason);
                JobResult::failure(job.id(), started_at, format!("executor panicked: {reason}"))
            }
        }
    }
}

/// Text of a panic payload
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Cloneable handle that can halt a pool from another task
#[derive(Debug, Clone)]
pub struct PoolHandle {
    queue: Arc<JobQueue>,
}

impl PoolHandle {
    /// Halts the pool, see [`WorkerPool::halt`]
    pub fn halt(&self) {
        if self.queue.halt() {
            info!("worker pool halted");
        }
    }

    /// Returns true once the pool is halted
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.queue.is_halted()
    }
}

/// Bounded-concurrency executor of jobs with result collection.
///
/// The pool is a scoped resource: call [`halt`](Self::halt) and then
/// [`join_workers`](Self::join_workers) on every exit path. A pool dropped
/// with live workers halts and aborts them.
///
/// [`join`](Self::join) takes `&mut self`, so only the owner can wait on the
/// pool and two joins can never be in flight at once.
pub struct WorkerPool {
    config: PoolConfig,
    queue: Arc<JobQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("stats", &self.queue.stats())
            .field("live_workers", &self.workers.len())
            .finish()
    }
}

impl WorkerPool {
    /// Creates the pool and starts its workers on the current runtime.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `worker_count` is zero or no tokio runtime is
    /// running.
    pub fn new(config: PoolConfig, executor: Arc<dyn JobExecutor>) -> PoolResult<Self> {
        config.validate()?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|e| PoolError::InvalidConfig {
                reason: format!("no tokio runtime: {e}"),
            })?;

        let queue = Arc::new(JobQueue::new());
        let workers = (0..config.worker_count)
            .map(|i| {
                let worker = Worker {
                    id: WorkerId(i),
                    queue: Arc::clone(&queue),
                    executor: Arc::clone(&executor),
                    stop_on_error: config.stop_on_error,
                };
                runtime.spawn(worker.run())
            })
            .collect();

        info!(
            "worker pool started with {} workers (stop on error: {})",
            config.worker_count, config.stop_on_error
        );

        Ok(Self {
            config,
            queue,
            workers,
        })
    }

    /// Appends a job to the pending queue.
    ///
    /// # Errors
    ///
    /// `Halted` if the pool no longer accepts work, `DuplicateJob` if a job
    /// with the same id was already submitted.
    pub fn submit(&self, job: Job) -> PoolResult<JobId> {
        let result = self.queue.enqueue(job);
        match &result {
            Ok(id) => debug!("submitted job {}", id),
            Err(e) => warn!("{}", e),
        }
        result
    }

    /// Waits until every submitted job has a result, or until the pool is
    /// halted and the jobs already in flight have finished.
    ///
    /// Workers stay alive afterwards, so more jobs may be submitted unless
    /// the pool is halted.
    pub async fn join(&mut self) {
        loop {
            let progressed = self.queue.progress().notified();
            if self.queue.is_settled() {
                return;
            }
            progressed.await;
        }
    }

    /// All results collected so far, in completion order
    #[must_use]
    pub fn completed_items(&self) -> Vec<JobResult> {
        self.queue.completed()
    }

    /// Fails if any collected result failed.
    ///
    /// # Errors
    ///
    /// `PartialFailure` describing the first failed result.
    pub fn check_results(&self) -> PoolResult {
        match self.queue.first_failure() {
            Some((first, failed, total)) => Err(PoolError::PartialFailure {
                failed,
                total,
                job_id: first.job_id,
                exit_code: first.exit_code,
                stderr: first.stderr.trim().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Stops workers from claiming new jobs. Jobs in flight run to
    /// completion. Idempotent.
    pub fn halt(&self) {
        self.handle().halt();
    }

    /// Waits for every worker to exit.
    ///
    /// # Errors
    ///
    /// `NotHalted` if [`halt`](Self::halt) was not called first.
    pub async fn join_workers(&mut self) -> PoolResult {
        if !self.queue.is_halted() {
            return Err(PoolError::NotHalted);
        }
        for (i, worker) in self.workers.drain(..).enumerate() {
            if let Err(e) = worker.await {
                warn!("{} exited abnormally: {}", WorkerId(i), e);
            }
        }
        let discarded = self.queue.discard_pending();
        if discarded > 0 {
            info!("{} queued jobs were discarded", discarded);
        }
        Ok(())
    }

    /// Returns a handle that can halt the pool from elsewhere
    #[must_use]
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            queue: Arc::clone(&self.queue),
        }
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.queue.stats()
    }

    /// Configured number of workers
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.config.worker_count
    }

    /// Returns true once halted
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.queue.is_halted()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        warn!("worker pool dropped without join_workers, aborting workers");
        self.queue.halt();
        for worker in self.workers.drain(..) {
            worker.abort();
        }
    }
}
