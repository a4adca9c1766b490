//! Fixed-capacity identity table.
//!
//! Open addressing with linear probing, hashed by `identity % capacity`.
//! The table is filled once and never resized or shrunk, so once it is
//! built it can be read from any number of threads without a lock.

use crate::error::{Result, ThrottleError};
use crate::Identity;

/// Write-once map from identity to `V`.
#[derive(Debug)]
pub struct IdentityTable<V> {
    slots: Box<[Option<(Identity, V)>]>,
    len: usize,
}

impl<V> IdentityTable<V> {
    /// Create a table with exactly `capacity` slots (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity)
            .map(|_| None)
            .collect::<Vec<_>>()
            .into_boxed_slice();
        IdentityTable { slots, len: 0 }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn home(&self, identity: Identity) -> usize {
        identity as usize % self.slots.len()
    }

    /// Insert `identity`. Fails on duplicates and when every slot is taken.
    pub fn insert(&mut self, identity: Identity, value: V) -> Result<()> {
        let capacity = self.capacity();
        let home = self.home(identity);
        for probe in 0..capacity {
            let idx = (home + probe) % capacity;
            if let Some((existing, _)) = &self.slots[idx] {
                if *existing == identity {
                    return Err(ThrottleError::DuplicateIdentity { identity });
                }
                continue;
            }
            self.slots[idx] = Some((identity, value));
            self.len += 1;
            return Ok(());
        }
        Err(ThrottleError::TableFull { capacity })
    }

    /// Look up `identity`.
    pub fn get(&self, identity: Identity) -> Option<&V> {
        let capacity = self.capacity();
        let home = self.home(identity);
        for probe in 0..capacity {
            match &self.slots[(home + probe) % capacity] {
                Some((existing, value)) if *existing == identity => return Some(value),
                Some(_) => continue,
                None => return None,
            }
        }
        None
    }

    /// Iterate over occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Identity, &V)> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref().map(|(id, v)| (*id, v)))
    }
}
