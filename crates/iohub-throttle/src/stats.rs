//! Admission counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Running counters for a [`crate::ThrottleGate`].
#[derive(Debug, Default)]
pub struct GateStats {
    admitted: AtomicU64,
    admitted_bytes: AtomicU64,
    throttled: AtomicU64,
    contended: AtomicU64,
    timed_out: AtomicU64,
}

/// Point-in-time copy of [`GateStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStatsSnapshot {
    /// Requests granted.
    pub admitted: u64,
    /// Bytes granted.
    pub admitted_bytes: u64,
    /// Times a caller slept waiting for a new period.
    pub throttled: u64,
    /// Compare-and-swap attempts lost to another thread.
    pub contended: u64,
    /// Requests refused because waiting would pass their deadline.
    pub timed_out: u64,
}

impl GateStats {
    /// Zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_admit(&self, bytes: u64) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
        self.admitted_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_throttle(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_contention(&self) {
        self.contended.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters.
    pub fn snapshot(&self) -> GateStatsSnapshot {
        GateStatsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            admitted_bytes: self.admitted_bytes.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}
