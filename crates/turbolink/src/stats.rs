//! Channel manager statistics
//!
//! Counters are observational only; nothing in the engine reads them to make
//! decisions.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters maintained by the [`ChannelManager`](crate::ChannelManager).
#[derive(Debug, Default)]
pub struct ManagerStats {
    /// Sends attempted on the current channel
    pub sends: AtomicU64,
    /// Sends whose first attempt failed
    pub send_failures: AtomicU64,
    /// Retries performed on a new channel after a failover
    pub failover_retries: AtomicU64,
    /// Failover retries that succeeded
    pub successful_failover_retries: AtomicU64,
    /// Switches that moved the current pointer
    pub switches_completed: AtomicU64,
    /// Switches that failed
    pub switches_failed: AtomicU64,
    /// Switch requests skipped because another was in flight
    pub switches_skipped: AtomicU64,
    /// Requests diverted into the buffer
    pub requests_buffered: AtomicU64,
    /// Buffered requests replayed
    pub requests_replayed: AtomicU64,
}

/// Point-in-time copy of [`ManagerStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Sends attempted on the current channel
    pub sends: u64,
    /// Sends whose first attempt failed
    pub send_failures: u64,
    /// Retries performed on a new channel after a failover
    pub failover_retries: u64,
    /// Failover retries that succeeded
    pub successful_failover_retries: u64,
    /// Switches that moved the current pointer
    pub switches_completed: u64,
    /// Switches that failed
    pub switches_failed: u64,
    /// Switch requests skipped because another was in flight
    pub switches_skipped: u64,
    /// Requests diverted into the buffer
    pub requests_buffered: u64,
    /// Buffered requests replayed
    pub requests_replayed: u64,
    /// Failover retry success rate (0.0 - 1.0)
    pub failover_success_rate: f64,
}

impl ManagerStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_send(&self) {
        self.sends.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failover_retry(&self, succeeded: bool) {
        self.failover_retries.fetch_add(1, Ordering::Relaxed);
        if succeeded {
            self.successful_failover_retries
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_switch_completed(&self) {
        self.switches_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_switch_failed(&self) {
        self.switches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_switch_skipped(&self) {
        self.switches_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_buffered(&self) {
        self.requests_buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_replayed(&self, count: usize) {
        self.requests_replayed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> StatsSnapshot {
        let failover_retries = self.failover_retries.load(Ordering::Relaxed);
        let successful_failover_retries = self.successful_failover_retries.load(Ordering::Relaxed);

        let failover_success_rate = if failover_retries > 0 {
            successful_failover_retries as f64 / failover_retries as f64
        } else {
            0.0
        };

        StatsSnapshot {
            sends: self.sends.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            failover_retries,
            successful_failover_retries,
            switches_completed: self.switches_completed.load(Ordering::Relaxed),
            switches_failed: self.switches_failed.load(Ordering::Relaxed),
            switches_skipped: self.switches_skipped.load(Ordering::Relaxed),
            requests_buffered: self.requests_buffered.load(Ordering::Relaxed),
            requests_replayed: self.requests_replayed.load(Ordering::Relaxed),
            failover_success_rate,
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        for counter in [
            &self.sends,
            &self.send_failures,
            &self.failover_retries,
            &self.successful_failover_retries,
            &self.switches_completed,
            &self.switches_failed,
            &self.switches_skipped,
            &self.requests_buffered,
            &self.requests_replayed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
