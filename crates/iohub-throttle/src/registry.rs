//! Identity to allocation mapping.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ThrottleError};
use crate::table::IdentityTable;
use crate::token::MAX_REMAINING;
use crate::{Identity, UNKNOWN_IDENTITY};

/// Bytes an identity may move per period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// The identity this allocation applies to.
    pub identity: Identity,
    /// Per-period byte allocation.
    pub full_quota_bytes: u64,
}

impl Allocation {
    /// Allocation of `full_quota_bytes` for `identity`.
    pub fn new(identity: Identity, full_quota_bytes: u64) -> Self {
        Allocation {
            identity,
            full_quota_bytes,
        }
    }

    /// Allocation applying to every identity not configured explicitly.
    pub fn fallback(full_quota_bytes: u64) -> Self {
        Allocation::new(UNKNOWN_IDENTITY, full_quota_bytes)
    }
}

/// Immutable set of allocations, fixed at construction.
///
/// Every identity resolves to a slot: configured identities to their own,
/// everything else to the slot of [`UNKNOWN_IDENTITY`].
#[derive(Debug)]
pub struct QuotaRegistry {
    table: IdentityTable<usize>,
    allocations: Box<[Allocation]>,
    fallback: usize,
}

impl QuotaRegistry {
    /// Build a registry. One of the allocations must be for
    /// [`UNKNOWN_IDENTITY`].
    pub fn new<I>(allocations: I) -> Result<Self>
    where
        I: IntoIterator<Item = Allocation>,
    {
        let allocations: Box<[Allocation]> = allocations.into_iter().collect();
        let mut table = IdentityTable::with_capacity(allocations.len() * 4);

        for (slot, alloc) in allocations.iter().enumerate() {
            if alloc.full_quota_bytes > MAX_REMAINING {
                return Err(ThrottleError::QuotaTooLarge {
                    identity: alloc.identity,
                    full: alloc.full_quota_bytes,
                    max: MAX_REMAINING,
                });
            }
            table.insert(alloc.identity, slot)?;
            debug!(
                uid = alloc.identity,
                bytes = alloc.full_quota_bytes,
                slot,
                "registered allocation"
            );
        }

        let fallback = *table
            .get(UNKNOWN_IDENTITY)
            .ok_or(ThrottleError::MissingFallback)?;

        Ok(QuotaRegistry {
            table,
            allocations,
            fallback,
        })
    }

    /// Slot index for `identity`, falling back to the unknown slot.
    pub fn slot(&self, identity: Identity) -> usize {
        self.table.get(identity).copied().unwrap_or(self.fallback)
    }

    /// Allocation that governs `identity`.
    pub fn lookup(&self, identity: Identity) -> &Allocation {
        &self.allocations[self.slot(identity)]
    }

    /// Slot index of the fallback allocation.
    pub fn fallback(&self) -> usize {
        self.fallback
    }

    /// Allocation stored in `slot`.
    pub fn allocation_at(&self, slot: usize) -> Option<&Allocation> {
        self.allocations.get(slot)
    }

    /// Number of configured allocations, fallback included.
    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    /// Always false for a successfully built registry.
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    /// Allocations in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Allocation> {
        self.allocations.iter()
    }
}
