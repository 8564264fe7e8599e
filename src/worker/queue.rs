//! Shared job queue.
//!
//! All state shared between the pool and its workers lives here behind a
//! single lock: the pending FIFO, the completed results, the in-flight
//! counter and the halted flag. The lock is never held across an `.await`.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use tokio::sync::Notify;

use super::job::{Job, JobId, JobResult};
use super::state::PoolStats;
use super::{PoolError, PoolResult};

/// Thread-safe job queue shared by a pool and its workers
#[derive(Debug, Default)]
pub(crate) struct JobQueue {
    state: Mutex<QueueState>,
    /// Woken on submit and halt
    work_ready: Notify,
    /// Woken on every completion and on halt
    progress: Notify,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Job>,
    completed: Vec<JobResult>,
    seen: HashSet<JobId>,
    in_flight: usize,
    failed: usize,
    halted: bool,
}

/// What a worker gets when it asks for work
#[derive(Debug)]
pub(crate) enum Claim {
    /// Run this job
    Job(Job),
    /// Nothing pending, wait for a wake-up
    Idle,
    /// The pool is halted, exit the loop
    Halted,
}

impl JobQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends a job to the pending FIFO
    pub(crate) fn enqueue(&self, job: Job) -> PoolResult<JobId> {
        let id = job.id();
        {
            let mut state = self.state.lock();
            if state.halted {
                return Err(PoolError::Halted { job_id: id });
            }
            if !state.seen.insert(id) {
                return Err(PoolError::DuplicateJob { job_id: id });
            }
            state.pending.push_back(job);
        }
        self.work_ready.notify_waiters();
        Ok(id)
    }

    /// Claims the oldest pending job, unless halted
    pub(crate) fn claim(&self) -> Claim {
        let mut state = self.state.lock();
        if state.halted {
            return Claim::Halted;
        }
        match state.pending.pop_front() {
            Some(job) => {
                state.in_flight += 1;
                Claim::Job(job)
            }
            None => Claim::Idle,
        }
    }

    /// Records the result of a claimed job.
    ///
    /// With `stop_on_error`, a failing result halts the queue in the same
    /// critical section that appends it. Returns true if this call halted it.
    pub(crate) fn finish(&self, result: JobResult, stop_on_error: bool) -> bool {
        let halted_now = {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            let failed = result.is_failure();
            state.completed.push(result);
            if failed {
                state.failed += 1;
            }
            let halt = failed && stop_on_error && !state.halted;
            if halt {
                state.halted = true;
            }
            halt
        };
        if halted_now {
            self.work_ready.notify_waiters();
        }
        self.progress.notify_waiters();
        halted_now
    }

    /// Marks the queue halted. Returns true on the first call.
    pub(crate) fn halt(&self) -> bool {
        let newly = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.halted, true)
        };
        self.work_ready.notify_waiters();
        self.progress.notify_waiters();
        newly
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.state.lock().halted
    }

    /// Nothing in flight, and either nothing pending or halted
    pub(crate) fn is_settled(&self) -> bool {
        let state = self.state.lock();
        state.in_flight == 0 && (state.pending.is_empty() || state.halted)
    }

    pub(crate) fn completed(&self) -> Vec<JobResult> {
        self.state.lock().completed.clone()
    }

    pub(crate) fn first_failure(&self) -> Option<(JobResult, usize, usize)> {
        let state = self.state.lock();
        state
            .completed
            .iter()
            .find(|r| r.is_failure())
            .map(|r| (r.clone(), state.failed, state.completed.len()))
    }

    /// Drops jobs that were never claimed. Only meaningful once halted.
    pub(crate) fn discard_pending(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.pending.len();
        state.pending.clear();
        dropped
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            submitted: state.seen.len(),
            pending: state.pending.len(),
            in_flight: state.in_flight,
            completed: state.completed.len(),
            failed: state.failed,
            halted: state.halted,
        }
    }

    pub(crate) fn work_ready(&self) -> &Notify {
        &self.work_ready
    }

    pub(crate) fn progress(&self) -> &Notify {
        &self.progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::job::CommandSpec;
    use chrono::Utc;

    fn job() -> Job {
        Job::new(CommandSpec::new("true"))
    }

    #[test]
    fn test_claims_in_fifo_order() {
        let queue = JobQueue::new();
        let first = queue.enqueue(job()).unwrap();
        let second = queue.enqueue(job()).unwrap();

        let Claim::Job(a) = queue.claim() else {
            panic!("expected a job");
        };
        let Claim::Job(b) = queue.claim() else {
            panic!("expected a job");
        };
        assert_eq!(a.id(), first);
        assert_eq!(b.id(), second);
        assert!(matches!(queue.claim(), Claim::Idle));
    }

    #[test]
    fn test_rejects_duplicate_job() {
        let queue = JobQueue::new();
        let j = job();
        queue.enqueue(j.clone()).unwrap();
        assert_eq!(
            queue.enqueue(j.clone()),
            Err(PoolError::DuplicateJob { job_id: j.id() })
        );
    }

    #[test]
    fn test_rejects_after_halt() {
        let queue = JobQueue::new();
        assert!(queue.halt());
        assert!(!queue.halt());
        let j = job();
        assert_eq!(
            queue.enqueue(j.clone()),
            Err(PoolError::Halted { job_id: j.id() })
        );
        assert!(matches!(queue.claim(), Claim::Halted));
    }

    #[test]
    fn test_failure_halts_with_stop_on_error() {
        let queue = JobQueue::new();
        queue.enqueue(job()).unwrap();
        queue.enqueue(job()).unwrap();

        let Claim::Job(j) = queue.claim() else {
            panic!("expected a job");
        };
        let halted = queue.finish(JobResult::from_exit(j.id(), Utc::now(), 1, "", "x"), true);

        assert!(halted);
        assert!(matches!(queue.claim(), Claim::Halted));
        assert!(queue.is_settled());
        assert_eq!(queue.stats().discarded(), 1);
        assert_eq!(queue.discard_pending(), 1);
    }

    #[test]
    fn test_failure_without_stop_on_error_keeps_going() {
        let queue = JobQueue::new();
        queue.enqueue(job()).unwrap();
        queue.enqueue(job()).unwrap();

        let Claim::Job(j) = queue.claim() else {
            panic!("expected a job");
        };
        assert!(!queue.finish(JobResult::from_exit(j.id(), Utc::now(), 1, "", "x"), false));
        assert!(matches!(queue.claim(), Claim::Job(_)));

        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.in_flight, 1);
        assert!(!queue.is_settled());
    }
}
