//! Sparse, block-addressed byte stores.
//!
//! A store is a linear address space backed by a chain of nodes, each holding
//! `qset` slots of `quantum`-byte pool blocks:
//!
//! ```text
//! SparseStore ──► Chain ──► [ChainNode 0] [ChainNode 1] ... [ChainNode n]
//!                               │ │             │
//!                               ▼ ▼             ▼
//!                             Block Block     Block        (from BlockPool)
//! ```
//!
//! Blocks are allocated on first write; anything never written is a hole and
//! reads back as zero length. Every read, write, seek, trim and control call
//! runs under the store guard, one call at a time.

pub mod chain;
pub mod layout;
pub mod report;
pub mod sparse;
pub mod view;

pub use chain::{Chain, ChainNode};
pub use layout::{Layout, Position};
pub use report::StoreReport;
pub use sparse::SparseStore;
pub use view::MappedView;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// The byte-transfer surface the completion queue drives.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Reads from a single block at `offset`; 0 means end of data or a hole.
    async fn read_at(
        &self,
        offset: u64,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<usize>;

    /// Writes into a single block at `offset`, returning how much was taken.
    async fn write_at(&self, offset: u64, buf: &[u8], cancel: &CancellationToken)
        -> Result<usize>;

    /// Current logical length in bytes.
    async fn size(&self, cancel: &CancellationToken) -> Result<u64>;

    /// Drops all data and restores the default layout.
    async fn trim(&self, cancel: &CancellationToken) -> Result<()>;
}

/// Reference point of a seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Current,
    End,
}

/// Resolves a seek against a cursor and the store size.
pub fn seek_position(current: u64, size: u64, off: i64, whence: Whence) -> Result<u64> {
    let base = match whence {
        Whence::Set => 0,
        Whence::Current => current,
        Whence::End => size,
    };
    let position = i128::from(base) + i128::from(off);
    if position < 0 {
        return Err(Error::InvalidArgument(format!(
            "seek to negative position {}",
            position
        )));
    }
    u64::try_from(position)
        .map_err(|_| Error::InvalidArgument(format!("seek position {} out of range", position)))
}
