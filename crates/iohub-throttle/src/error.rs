use std::time::Duration;

use thiserror::Error;

use crate::Identity;

/// Errors raised while building or consulting the throttler.
#[derive(Debug, Error)]
pub enum ThrottleError {
    /// No allocation was configured for [`crate::UNKNOWN_IDENTITY`].
    #[error("No allocation for uid 0xffffffff (all uids that are not configured)")]
    MissingFallback,

    /// The same identity was configured twice.
    #[error("Duplicate allocation for uid {identity}")]
    DuplicateIdentity { identity: Identity },

    /// The identity table has no free slot left.
    #[error("Identity table full: capacity {capacity}")]
    TableFull { capacity: usize },

    /// An allocation does not fit in the token word.
    #[error("Allocation for uid {identity} is {full} bytes, maximum is {max}")]
    QuotaTooLarge { identity: Identity, full: u64, max: u64 },

    /// The period length is zero.
    #[error("Throttling period must be non-zero")]
    InvalidPeriod,

    /// A single request asked for more than an entire period can supply.
    #[error("uid {identity} asked for {requested} bytes, but its full allocation is {full}")]
    ExceedsAllocation {
        identity: Identity,
        requested: u64,
        full: u64,
    },

    /// Granting the request would mean sleeping past the caller's deadline.
    #[error("uid {identity} would block {wait:?} for {requested} bytes")]
    WouldBlock {
        identity: Identity,
        requested: u64,
        wait: Duration,
    },
}

/// Result alias for throttler operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;

impl ThrottleError {
    /// True for errors that no amount of waiting can fix.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ThrottleError::WouldBlock { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_would_block_is_not_fatal() {
        let err = ThrottleError::WouldBlock {
            identity: 1000,
            requested: 10,
            wait: Duration::from_millis(5),
        };
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_configuration_errors_are_fatal() {
        assert!(ThrottleError::MissingFallback.is_fatal());
        assert!(ThrottleError::ExceedsAllocation {
            identity: 1,
            requested: 2,
            full: 1
        }
        .is_fatal());
        assert!(ThrottleError::InvalidPeriod.is_fatal());
    }

    #[test]
    fn test_display_messages_non_empty() {
        let errors = [
            ThrottleError::MissingFallback,
            ThrottleError::DuplicateIdentity { identity: 7 },
            ThrottleError::TableFull { capacity: 4 },
            ThrottleError::QuotaTooLarge {
                identity: 7,
                full: u64::MAX,
                max: 1,
            },
            ThrottleError::InvalidPeriod,
        ];
        for err in errors {
            assert!(!err.to_string().is_empty());
        }
    }

    #[test]
    fn test_exceeds_allocation_message_names_amounts() {
        let err = ThrottleError::ExceedsAllocation {
            identity: 1015,
            requested: 200,
            full: 100,
        };
        let msg = err.to_string();
        assert!(msg.contains("1015"));
        assert!(msg.contains("200"));
        assert!(msg.contains("100"));
    }
}
