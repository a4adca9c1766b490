#![warn(missing_docs)]

//! iohub admission control.
//!
//! Time is broken up into throttling periods (5 seconds by default). During
//! each period every uid may read or write a fixed number of bytes. Once a
//! uid has spent its allocation, further I/O on its behalf sleeps until the
//! next period starts and the allocation renews.
//!
//! Budgets live in one atomic word per uid, so admission never takes a lock
//! and uids never contend with each other.

pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod registry;
pub mod stats;
pub mod table;
pub mod token;

/// Numeric principal on whose behalf I/O is performed (a uid).
pub type Identity = u32;

/// Reserved identity whose allocation applies to every unconfigured uid.
pub const UNKNOWN_IDENTITY: Identity = 0xffff_ffff;

pub use clock::{ManualTimeSource, MonotonicTimeSource, PeriodClock, TimeSource};
pub use config::{AllocationConfig, ThrottleConfig};
pub use error::{Result, ThrottleError};
pub use gate::ThrottleGate;
pub use registry::{Allocation, QuotaRegistry};
pub use stats::{GateStats, GateStatsSnapshot};
