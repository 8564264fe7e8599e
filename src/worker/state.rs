//! Pool statistics.

use serde::{Deserialize, Serialize};

/// Snapshot of a pool's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Jobs accepted by `submit`
    pub submitted: usize,
    /// Jobs waiting to be claimed
    pub pending: usize,
    /// Jobs currently executing
    pub in_flight: usize,
    /// Results collected
    pub completed: usize,
    /// Results with `success = false`
    pub failed: usize,
    /// Whether the pool is halted
    pub halted: bool,
}

impl PoolStats {
    /// Jobs that will never run because the pool halted first
    #[must_use]
    pub fn discarded(&self) -> usize {
        if self.halted { self.pending } else { 0 }
    }

    /// Returns true once every accepted job has a result
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.in_flight == 0
    }
}
