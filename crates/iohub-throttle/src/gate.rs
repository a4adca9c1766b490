//! Admission gate.
//!
//! Every read or write asks the gate for permission to move `amount` bytes
//! on behalf of an identity. The gate debits the identity's budget for the
//! current period with a compare-and-swap on its token word. When the budget
//! is exhausted, the caller sleeps until the next period begins, at which
//! point the first admission to observe the new period renews the budget.
//! No lock is held at any point, and there is no background refill thread.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::clock::{MonotonicTimeSource, PeriodClock, TimeSource};
use crate::error::{Result, ThrottleError};
use crate::registry::QuotaRegistry;
use crate::stats::GateStats;
use crate::token::{TokenState, TokenWord};
use crate::Identity;

/// Per-identity byte-budget throttle.
#[derive(Debug)]
pub struct ThrottleGate<T: TimeSource = MonotonicTimeSource> {
    registry: Arc<QuotaRegistry>,
    tokens: Box<[TokenState]>,
    clock: PeriodClock<T>,
    stats: GateStats,
}

impl ThrottleGate<MonotonicTimeSource> {
    /// Gate on the monotonic clock with periods of `period`.
    pub fn new(registry: Arc<QuotaRegistry>, period: Duration) -> Result<Self> {
        Ok(ThrottleGate::with_clock(
            registry,
            PeriodClock::monotonic(period)?,
        ))
    }
}

impl<T: TimeSource> ThrottleGate<T> {
    /// Gate on an arbitrary clock.
    pub fn with_clock(registry: Arc<QuotaRegistry>, clock: PeriodClock<T>) -> Self {
        let tokens = (0..registry.len()).map(|_| TokenState::new()).collect();
        ThrottleGate {
            registry,
            tokens,
            clock,
            stats: GateStats::new(),
        }
    }

    /// Block until `amount` bytes have been debited from `identity`'s
    /// budget for the current period.
    ///
    /// A request larger than the identity's whole allocation can never be
    /// satisfied; it is logged and the process aborts.
    pub fn admit(&self, identity: Identity, amount: u64) {
        if let Err(e) = self.acquire(identity, amount, None) {
            error!(uid = identity, bytes = amount, "throttle: {}", e);
            std::process::abort();
        }
    }

    /// Like [`admit`](Self::admit), but returns
    /// [`ThrottleError::ExceedsAllocation`] instead of aborting.
    pub fn admit_checked(&self, identity: Identity, amount: u64) -> Result<()> {
        self.acquire(identity, amount, None)
    }

    /// Like [`admit_checked`](Self::admit_checked), but refuses with
    /// [`ThrottleError::WouldBlock`] when the budget would not renew within
    /// `timeout`. Nothing is debited in that case.
    pub fn admit_timeout(&self, identity: Identity, amount: u64, timeout: Duration) -> Result<()> {
        let deadline = self.clock.now().saturating_add(timeout);
        self.acquire(identity, amount, Some(deadline))
    }

    /// Admit only if the bytes are available right now.
    pub fn try_admit(&self, identity: Identity, amount: u64) -> Result<()> {
        self.admit_timeout(identity, amount, Duration::ZERO)
    }

    /// Bytes `identity` could be admitted right now without sleeping.
    pub fn remaining(&self, identity: Identity) -> u64 {
        let slot = self.registry.slot(identity);
        let full = self.full_at(slot);
        let (period, _) = self.clock.current_period();
        self.tokens[slot].load().available(period, full)
    }

    /// The registry this gate enforces.
    pub fn registry(&self) -> &Arc<QuotaRegistry> {
        &self.registry
    }

    /// The clock periods are derived from.
    pub fn clock(&self) -> &PeriodClock<T> {
        &self.clock
    }

    /// Admission counters.
    pub fn stats(&self) -> &GateStats {
        &self.stats
    }

    fn full_at(&self, slot: usize) -> u64 {
        self.registry
            .allocation_at(slot)
            .map(|a| a.full_quota_bytes)
            .unwrap_or(0)
    }

    fn acquire(&self, identity: Identity, amount: u64, deadline: Option<Duration>) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }

        let slot = self.registry.slot(identity);
        let full = self.full_at(slot);
        let token = &self.tokens[slot];
        let mut prev = token.load();

        loop {
            let (period, now) = self.clock.current_period();
            let available = prev.available(period, full);

            if available >= amount {
                let next = TokenWord::new(period, available - amount);
                match token.compare_exchange(prev, next) {
                    Ok(()) => {
                        self.stats.record_admit(amount);
                        return Ok(());
                    }
                    Err(observed) => {
                        self.stats.record_contention();
                        prev = observed;
                        continue;
                    }
                }
            }

            if amount > full {
                return Err(ThrottleError::ExceedsAllocation {
                    identity,
                    requested: amount,
                    full,
                });
            }

            let wait = self.clock.until_next_period(now);
            if let Some(deadline) = deadline {
                if now.saturating_add(wait) > deadline {
                    self.stats.record_timeout();
                    return Err(ThrottleError::WouldBlock {
                        identity,
                        requested: amount,
                        wait,
                    });
                }
            }

            self.stats.record_throttle();
            debug!(
                uid = identity,
                bytes = amount,
                available,
                wait_ms = wait.as_millis() as u64,
                "throttled until next period"
            );
            self.clock.sleep_until_next_period(now);
            prev = token.load();
        }
    }
}
