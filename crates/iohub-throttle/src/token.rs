//! Per-identity token state.
//!
//! Each identity owns one 64-bit word:
//!
//! ```text
//!  63                                  20 19              0
//! +--------------------------------------+-----------------+
//! |           remaining bytes            |   period tag    |
//! +--------------------------------------+-----------------+
//! ```
//!
//! Both fields change together through a single compare-and-swap.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::clock::{PeriodIndex, PERIOD_BITS, PERIOD_MASK};

/// Bits available for the remaining-bytes field.
pub const REMAINING_BITS: u32 = 64 - PERIOD_BITS;

/// Largest byte count a token word can hold, and therefore the largest
/// per-period allocation.
pub const MAX_REMAINING: u64 = (1 << REMAINING_BITS) - 1;

/// Decoded view of a token word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenWord(u64);

impl TokenWord {
    /// Pack `remaining` bytes for `period`.
    pub fn new(period: PeriodIndex, remaining: u64) -> Self {
        debug_assert!(remaining <= MAX_REMAINING);
        TokenWord((remaining << PERIOD_BITS) | (period as u64 & PERIOD_MASK))
    }

    /// Wrap a raw word.
    pub const fn from_raw(raw: u64) -> Self {
        TokenWord(raw)
    }

    /// The raw packed word.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Period tag.
    pub const fn period(self) -> PeriodIndex {
        (self.0 & PERIOD_MASK) as PeriodIndex
    }

    /// Bytes left in the tagged period.
    pub const fn remaining(self) -> u64 {
        self.0 >> PERIOD_BITS
    }

    /// Bytes spendable in `current` for an identity entitled to `full`
    /// bytes per period. A tag from any other period means the budget has
    /// renewed; unused bytes from that period are gone.
    pub fn available(self, current: PeriodIndex, full: u64) -> u64 {
        if self.period() != current {
            full
        } else {
            self.remaining()
        }
    }
}

/// Atomically updated token word.
#[derive(Debug, Default)]
pub struct TokenState(AtomicU64);

impl TokenState {
    /// Zeroed state: period 0, nothing remaining.
    pub const fn new() -> Self {
        TokenState(AtomicU64::new(0))
    }

    /// Read the current word.
    pub fn load(&self) -> TokenWord {
        TokenWord(self.0.load(Ordering::Acquire))
    }

    /// Replace `prev` with `next`. On failure returns the word another
    /// thread stored in the meantime.
    pub fn compare_exchange(&self, prev: TokenWord, next: TokenWord) -> Result<(), TokenWord> {
        self.0
            .compare_exchange(prev.0, next.0, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(TokenWord)
    }
}
