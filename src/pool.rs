//! Fixed-size block allocator.
//!
//! Every block handed out by a [`BlockPool`] is exactly `quantum` bytes. Released
//! blocks go back onto the pool's idle list and are reused by later allocations,
//! so repeated fill/trim cycles do not churn the general allocator.
//!
//! Pools are process-wide and keyed by quantum: [`BlockPool::shared`] returns the
//! same pool to every store using that quantum. Shared pools live for the rest of
//! the process; [`BlockPool::shrink`] hands their idle buffers back.

use std::{
    fmt,
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, OnceLock, PoisonError,
    },
};

use crossbeam_skiplist::SkipMap;

use crate::error::Result;

static POOLS: OnceLock<SkipMap<usize, Arc<BlockPool>>> = OnceLock::new();

pub struct BlockPool {
    quantum: usize,
    idle: Mutex<Vec<Box<[u8]>>>,
    stats: Stats,
}

impl BlockPool {
    /// Creates a private pool of `quantum`-sized blocks.
    ///
    /// # Panics
    ///
    /// Panics if `quantum` is zero. Stores only reach here with a quantum
    /// already checked by [`Layout::new`](crate::store::Layout::new).
    pub fn new(quantum: usize) -> Arc<Self> {
        assert!(quantum > 0, "block pool quantum must be positive");
        Arc::new(Self {
            quantum,
            idle: Mutex::new(Vec::new()),
            stats: Stats::new(),
        })
    }

    /// Returns the process-wide pool for `quantum`, creating it on first use.
    ///
    /// # Panics
    ///
    /// Panics if `quantum` is zero.
    pub fn shared(quantum: usize) -> Arc<Self> {
        let pools = POOLS.get_or_init(SkipMap::new);
        if let Some(entry) = pools.get(&quantum) {
            return entry.value().clone();
        }
        let entry = pools.get_or_insert_with(quantum, || {
            tracing::debug!(quantum, "Creating block pool");
            Self::new(quantum)
        });
        entry.value().clone()
    }

    /// Snapshot of every shared pool created so far, ordered by quantum.
    pub fn shared_pools() -> Vec<Arc<Self>> {
        match POOLS.get() {
            Some(pools) => pools.iter().map(|e| e.value().clone()).collect(),
            None => Vec::new(),
        }
    }

    pub fn quantum(&self) -> usize {
        self.quantum
    }

    /// Hands out a zero-filled block, reusing an idle buffer when one exists.
    pub fn allocate(self: &Arc<Self>) -> Result<Block> {
        let reused = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let buf = match reused {
            Some(mut buf) => {
                buf.fill(0);
                self.stats.reused.fetch_add(1, Ordering::SeqCst);
                buf
            }
            None => {
                let mut buf = Vec::new();
                buf.try_reserve_exact(self.quantum)?;
                buf.resize(self.quantum, 0);
                self.stats.allocated.fetch_add(1, Ordering::SeqCst);
                buf.into_boxed_slice()
            }
        };

        self.stats.outstanding.fetch_add(1, Ordering::SeqCst);
        Ok(Block {
            buf: Some(buf),
            pool: self.clone(),
        })
    }

    /// Returns a block to the pool it came from.
    pub fn release(&self, block: Block) {
        debug_assert!(
            std::ptr::eq(Arc::as_ptr(&block.pool), self),
            "block released to a foreign pool"
        );
        drop(block);
    }

    /// Frees every idle buffer, returning how many were dropped.
    pub fn shrink(&self) -> usize {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        let freed = idle.len();
        idle.clear();
        idle.shrink_to_fit();
        freed
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            quantum: self.quantum,
            allocated: self.stats.allocated.load(Ordering::SeqCst),
            reused: self.stats.reused.load(Ordering::SeqCst),
            released: self.stats.released.load(Ordering::SeqCst),
            outstanding: self.stats.outstanding.load(Ordering::SeqCst),
            idle: self
                .idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }

    fn put_back(&self, buf: Box<[u8]>) {
        debug_assert_eq!(buf.len(), self.quantum);
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(buf);
        self.stats.released.fetch_add(1, Ordering::SeqCst);
        self.stats.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPool")
            .field("quantum", &self.quantum)
            .field("stats", &self.stats())
            .finish()
    }
}

struct Stats {
    allocated: AtomicUsize,
    reused: AtomicUsize,
    released: AtomicUsize,
    outstanding: AtomicUsize,
}

impl Stats {
    fn new() -> Self {
        Stats {
            allocated: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub quantum: usize,
    /// Buffers obtained from the general allocator
    pub allocated: usize,
    /// Allocations served from the idle list
    pub reused: usize,
    /// Blocks handed back to the pool
    pub released: usize,
    /// Blocks currently owned by a slot
    pub outstanding: usize,
    /// Buffers waiting on the idle list
    pub idle: usize,
}

/// A pool-owned buffer of exactly one quantum. Dropping it returns the buffer
/// to its pool.
pub struct Block {
    buf: Option<Box<[u8]>>,
    pool: Arc<BlockPool>,
}

impl Block {
    pub fn pool(&self) -> &Arc<BlockPool> {
        &self.pool
    }
}

impl Deref for Block {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for Block {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block").field("len", &self.len()).finish()
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put_back(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "quantum must be positive")]
    fn test_zero_quantum_pool_panics() {
        BlockPool::new(0);
    }

    #[test]
    fn test_allocate_is_zeroed_and_sized() {
        let pool = BlockPool::new(64);
        let block = pool.allocate().unwrap();
        assert_eq!(block.len(), 64);
        assert!(block.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_released_blocks_are_reused_and_rezeroed() {
        let pool = BlockPool::new(32);
        let mut block = pool.allocate().unwrap();
        block[..4].copy_from_slice(b"dirt");
        pool.release(block);

        let stats = pool.stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.idle, 1);

        let block = pool.allocate().unwrap();
        assert!(block.iter().all(|b| *b == 0));
        let stats = pool.stats();
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.reused, 1);
        assert_eq!(stats.outstanding, 1);
        assert_eq!(stats.idle, 0);
    }

    #[test]
    fn test_drop_returns_to_pool() {
        let pool = BlockPool::new(16);
        {
            let _a = pool.allocate().unwrap();
            let _b = pool.allocate().unwrap();
            assert_eq!(pool.stats().outstanding, 2);
        }
        assert_eq!(pool.stats().outstanding, 0);
        assert_eq!(pool.stats().idle, 2);
    }

    #[test]
    fn test_shrink_frees_idle() {
        let pool = BlockPool::new(8);
        let blocks: Vec<_> = (0..3).map(|_| pool.allocate().unwrap()).collect();
        drop(blocks);
        assert_eq!(pool.shrink(), 3);
        assert_eq!(pool.stats().idle, 0);
    }

    #[test]
    fn test_shared_pool_is_per_quantum() {
        let a = BlockPool::shared(1531);
        let b = BlockPool::shared(1531);
        let c = BlockPool::shared(1537);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.quantum(), 1537);
        assert!(BlockPool::shared_pools()
            .iter()
            .any(|p| Arc::ptr_eq(p, &a)));
    }

    #[test]
    fn test_concurrent_allocate_release() {
        let pool = BlockPool::new(128);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let block = pool.allocate().unwrap();
                        assert_eq!(block.len(), 128);
                        pool.release(block);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.allocated + stats.reused, 1600);
        assert_eq!(stats.released, 1600);
    }
}
