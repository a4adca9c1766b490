//! Period clock.
//!
//! Periods are numbered from a monotonic timeline, never from wall-clock
//! time, so clock adjustments cannot reset or stretch a budget window.
//! Only equality between two period indices is meaningful.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Result, ThrottleError};

/// Number of bits used to identify a throttling period.
pub const PERIOD_BITS: u32 = 20;

/// Mask selecting the period bits of a token word.
pub const PERIOD_MASK: u64 = (1 << PERIOD_BITS) - 1;

/// Default throttling period length.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(5);

/// Period index modulo 2^[`PERIOD_BITS`].
pub type PeriodIndex = u32;

/// Monotonic timeline the clock reads and sleeps on.
pub trait TimeSource: Send + Sync {
    /// Time elapsed since the source's origin.
    fn elapsed(&self) -> Duration;

    /// Block the calling thread until `elapsed()` has reached `deadline`.
    fn sleep_until(&self, deadline: Duration);
}

/// `Instant`-backed time source.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicTimeSource {
    origin: Instant,
}

impl MonotonicTimeSource {
    /// Start a timeline at the current instant.
    pub fn new() -> Self {
        MonotonicTimeSource {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicTimeSource {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep_until(&self, deadline: Duration) {
        let now = self.elapsed();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

/// Manually driven timeline.
///
/// Clones share the same timeline. `sleep_until` moves the timeline forward
/// to the deadline instead of blocking; it never moves it backwards.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    nanos: Arc<AtomicU64>,
}

impl ManualTimeSource {
    /// Timeline starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeline starting at `start`.
    pub fn starting_at(start: Duration) -> Self {
        let source = Self::new();
        source.set(start);
        source
    }

    /// Move the timeline forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.nanos.fetch_add(duration_to_nanos(by), Ordering::SeqCst);
    }

    /// Jump the timeline to `to`.
    pub fn set(&self, to: Duration) {
        self.nanos.store(duration_to_nanos(to), Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }

    fn sleep_until(&self, deadline: Duration) {
        self.nanos
            .fetch_max(duration_to_nanos(deadline), Ordering::SeqCst);
    }
}

fn duration_to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Derives period indices from a [`TimeSource`].
///
/// The first period of a timeline is numbered 1, so a zeroed token word
/// (period 0) always reads as stale until the index wraps.
#[derive(Debug, Clone)]
pub struct PeriodClock<T = MonotonicTimeSource> {
    source: T,
    period: Duration,
}

impl PeriodClock<MonotonicTimeSource> {
    /// Monotonic clock with the given period length.
    pub fn monotonic(period: Duration) -> Result<Self> {
        PeriodClock::new(MonotonicTimeSource::new(), period)
    }
}

impl<T: TimeSource> PeriodClock<T> {
    /// Create a clock; `period` must be non-zero.
    pub fn new(source: T, period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(ThrottleError::InvalidPeriod);
        }
        Ok(PeriodClock { source, period })
    }

    /// Length of one period.
    pub fn period_length(&self) -> Duration {
        self.period
    }

    /// The underlying time source.
    pub fn source(&self) -> &T {
        &self.source
    }

    /// Current position on the timeline.
    pub fn now(&self) -> Duration {
        self.source.elapsed()
    }

    /// Period index containing `now`.
    pub fn period_at(&self, now: Duration) -> PeriodIndex {
        let number = now.as_nanos() / self.period.as_nanos() + 1;
        (number & PERIOD_MASK as u128) as PeriodIndex
    }

    /// Current period index together with the instant it was derived from.
    pub fn current_period(&self) -> (PeriodIndex, Duration) {
        let now = self.now();
        (self.period_at(now), now)
    }

    /// Time from `now` until the next period begins. Exact to the
    /// nanosecond and always non-zero, so sleeping this long never wakes
    /// inside the current period.
    pub fn until_next_period(&self, now: Duration) -> Duration {
        let period = self.period.as_nanos();
        let into_period = now.as_nanos() % period;
        let remaining = period - into_period;
        Duration::from_nanos(u64::try_from(remaining).unwrap_or(u64::MAX))
    }

    /// Sleep until the period following the one containing `now` begins.
    pub fn sleep_until_next_period(&self, now: Duration) {
        self.source
            .sleep_until(now.saturating_add(self.until_next_period(now)));
    }
}
