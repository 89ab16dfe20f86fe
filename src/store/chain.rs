use std::sync::Arc;

use super::layout::{Layout, Position};
use crate::error::{Error, Result};
use crate::pool::{Block, BlockPool};

/// One segment of the address space: `qset` slots, each empty or owning a block.
///
/// The slot table itself is allocated on the first write into the node.
#[derive(Debug, Default)]
pub struct ChainNode {
    slots: Vec<Option<Block>>,
}

impl ChainNode {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn slot(&self, index: usize) -> Option<&Block> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn has_slot_table(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Indices of slots holding a block.
    pub fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| i))
    }

    pub fn block_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn ensure_slots(&mut self, qset: usize) -> Result<()> {
        if self.slots.len() < qset {
            self.slots.try_reserve_exact(qset - self.slots.len())?;
            self.slots.resize_with(qset, || None);
        }
        Ok(())
    }
}

/// The chain of nodes behind a store, plus the addressing state it is walked with.
///
/// Nodes live in an arena indexed by position; `nodes[0]` is the head and always
/// exists. Not synchronized: the owning store serializes access.
#[derive(Debug)]
pub struct Chain {
    layout: Layout,
    pool: Arc<BlockPool>,
    size: u64,
    nodes: Vec<ChainNode>,
    blocks: usize,
    max_blocks: Option<usize>,
}

impl Chain {
    pub fn new(layout: Layout, max_blocks: Option<usize>) -> Self {
        Self {
            layout,
            pool: BlockPool::shared(layout.quantum()),
            size: 0,
            nodes: vec![ChainNode::new()],
            blocks: 0,
            max_blocks,
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Changes the addressing used by later reads and writes. Stored data is not moved.
    pub fn set_layout(&mut self, layout: Layout) {
        if layout.quantum() != self.layout.quantum() {
            self.pool = BlockPool::shared(layout.quantum());
        }
        self.layout = layout;
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn nodes(&self) -> &[ChainNode] {
        &self.nodes
    }

    /// Live blocks across every node.
    pub fn block_count(&self) -> usize {
        self.blocks
    }

    /// Copies out of the block holding `offset`, stopping at the end of that
    /// block or the end of data. Returns 0 past the end and on holes.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> usize {
        if offset >= self.size || buf.is_empty() {
            return 0;
        }
        let pos = self.layout.resolve(offset);
        let Some(block) = self.block(pos) else {
            return 0;
        };
        if pos.offset >= block.len() {
            return 0;
        }

        let available = self.size - offset;
        let count = (buf.len() as u64).min(available) as usize;
        let count = count
            .min(self.layout.quantum() - pos.offset)
            .min(block.len() - pos.offset);

        buf[..count].copy_from_slice(&block[pos.offset..pos.offset + count]);
        count
    }

    /// Copies into the block holding `offset`, allocating nodes and the block as
    /// needed. Never crosses a block boundary; returns the number of bytes taken.
    pub fn write(&mut self, offset: u64, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let pos = self.layout.resolve(offset);
        let count = buf.len().min(self.layout.quantum() - pos.offset);
        let end = offset.checked_add(count as u64).ok_or_else(|| {
            Error::InvalidArgument(format!("write at {} overflows the address space", offset))
        })?;
        let needed = pos.offset + count;

        let index = self.extend_to(pos.node)?;
        let node = &mut self.nodes[index];
        node.ensure_slots(self.layout.qset())?;
        let slot = &mut node.slots[pos.slot];

        let block = match slot {
            Some(block) if block.len() >= needed => block,
            _ => {
                if slot.is_none() {
                    if let Some(max) = self.max_blocks {
                        if self.blocks >= max {
                            return Err(Error::OutOfMemory);
                        }
                    }
                }
                let mut fresh = self.pool.allocate()?;
                match slot.take() {
                    // left over from an earlier, smaller quantum
                    Some(stale) => {
                        let keep = stale.len().min(fresh.len());
                        fresh[..keep].copy_from_slice(&stale[..keep]);
                    }
                    None => self.blocks += 1,
                }
                slot.insert(fresh)
            }
        };

        block[pos.offset..needed].copy_from_slice(&buf[..count]);
        if end > self.size {
            self.size = end;
        }
        Ok(count)
    }

    /// The block holding `offset`, if one has been written.
    pub fn block_at(&self, offset: u64) -> Option<&Block> {
        if offset >= self.size {
            return None;
        }
        self.block(self.layout.resolve(offset))
    }

    /// Drops every block and every node but the head, and restores `defaults`.
    /// Returns the number of blocks handed back to their pools.
    pub fn trim(&mut self, defaults: Layout) -> usize {
        let released = self.blocks;
        self.nodes = vec![ChainNode::new()];
        self.size = 0;
        self.blocks = 0;
        self.set_layout(defaults);
        released
    }

    fn block(&self, pos: Position) -> Option<&Block> {
        let index = usize::try_from(pos.node).ok()?;
        self.nodes.get(index)?.slot(pos.slot)
    }

    fn extend_to(&mut self, node: u64) -> Result<usize> {
        let index = usize::try_from(node).map_err(|_| Error::OutOfMemory)?;
        let len = index.checked_add(1).ok_or(Error::OutOfMemory)?;
        if len > self.nodes.len() {
            self.nodes.try_reserve(len - self.nodes.len())?;
            self.nodes.resize_with(len, ChainNode::new);
            tracing::debug!(nodes = len, "Extended chain");
        }
        Ok(index)
    }
}
