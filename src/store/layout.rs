//! Offset arithmetic over `(quantum, qset)`.
//!
//! ```text
//!  node 0                         node 1
//! ┌────────┬────────┬─────┬──────┐┌────────┬────────┬─────┐
//! │ slot 0 │ slot 1 │ ... │ S-1  ││ slot 0 │ slot 1 │ ... │
//! └────────┴────────┴─────┴──────┘└────────┴────────┴─────┘
//!  <─ Q ──>
//!  <────────── item = Q * S ─────>
//! ```

use crate::error::{Error, Result};

/// Addressing parameters of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    quantum: usize,
    qset: usize,
}

/// Where a logical byte offset lives in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub node: u64,
    pub slot: usize,
    pub offset: usize,
}

impl Layout {
    /// Fails when either parameter is zero or one node would span more than `u64::MAX` bytes.
    pub fn new(quantum: usize, qset: usize) -> Result<Self> {
        if quantum == 0 {
            return Err(Error::InvalidArgument("quantum must be positive".into()));
        }
        if qset == 0 {
            return Err(Error::InvalidArgument("qset must be positive".into()));
        }
        (quantum as u64).checked_mul(qset as u64).ok_or_else(|| {
            Error::InvalidArgument(format!("quantum {} * qset {} overflows", quantum, qset))
        })?;
        Ok(Self { quantum, qset })
    }

    #[inline]
    pub fn quantum(&self) -> usize {
        self.quantum
    }

    #[inline]
    pub fn qset(&self) -> usize {
        self.qset
    }

    /// Bytes covered by one chain node.
    #[inline]
    pub fn item_size(&self) -> u64 {
        self.quantum as u64 * self.qset as u64
    }

    #[inline]
    pub fn resolve(&self, offset: u64) -> Position {
        let item_size = self.item_size();
        let rem = offset % item_size;
        Position {
            node: offset / item_size,
            slot: (rem / self.quantum as u64) as usize,
            offset: (rem % self.quantum as u64) as usize,
        }
    }

    /// Logical offset of the first byte of `(node, slot)`.
    #[inline]
    pub fn block_start(&self, node: u64, slot: usize) -> u64 {
        node * self.item_size() + (slot as u64) * self.quantum as u64
    }
}
