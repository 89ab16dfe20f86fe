use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use super::{
    chain::Chain, layout::Layout, report::StoreReport, seek_position, view::MappedView, Store,
    Whence,
};
use crate::{
    config::DeviceConfig,
    control::ControlOp,
    error::{Error, Result},
};

/// One logical device: a chain of pooled blocks behind a single guard.
///
/// Every operation that touches the chain takes a [`CancellationToken`]. If the
/// token fires while the call is still waiting for the guard, the call returns
/// [`Error::Interrupted`] without having changed anything.
#[derive(Debug)]
pub struct SparseStore {
    index: usize,
    defaults: Layout,
    chain: Mutex<Chain>,
    mapped_views: AtomicUsize,
}

impl SparseStore {
    pub fn new(index: usize, defaults: Layout, max_blocks: Option<usize>) -> Self {
        Self {
            index,
            defaults,
            chain: Mutex::new(Chain::new(defaults, max_blocks)),
            mapped_views: AtomicUsize::new(0),
        }
    }

    pub fn from_config(index: usize, config: &DeviceConfig) -> Result<Self> {
        let defaults = Layout::new(config.quantum, config.qset)?;
        Ok(Self::new(index, defaults, config.max_blocks))
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// The layout trim and reset return to.
    pub fn defaults(&self) -> Layout {
        self.defaults
    }

    async fn lock(&self, cancel: &CancellationToken) -> Result<MutexGuard<'_, Chain>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Interrupted),
            chain = self.chain.lock() => Ok(chain),
        }
    }

    pub async fn read(
        &self,
        offset: u64,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let chain = self.lock(cancel).await?;
        Ok(chain.read(offset, buf))
    }

    pub async fn write(
        &self,
        offset: u64,
        buf: &[u8],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let mut chain = self.lock(cancel).await?;
        chain.write(offset, buf)
    }

    pub async fn size(&self, cancel: &CancellationToken) -> Result<u64> {
        Ok(self.lock(cancel).await?.size())
    }

    pub async fn layout(&self, cancel: &CancellationToken) -> Result<Layout> {
        Ok(self.lock(cancel).await?.layout())
    }

    /// Releases every block and node. Refused with [`Error::Busy`] while any
    /// mapped view is open.
    pub async fn trim(&self, cancel: &CancellationToken) -> Result<()> {
        let mut chain = self.lock(cancel).await?;
        if self.mapped_views.load(Ordering::SeqCst) > 0 {
            return Err(Error::Busy);
        }
        let released = chain.trim(self.defaults);
        tracing::debug!(device = self.index, released, "Trimmed store");
        Ok(())
    }

    pub async fn seek(
        &self,
        current: u64,
        off: i64,
        whence: Whence,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let chain = self.lock(cancel).await?;
        seek_position(current, chain.size(), off, whence)
    }

    /// Applies a control operation. Queries, exchanges and shifts return the
    /// value in effect before the call.
    pub async fn control(
        &self,
        op: ControlOp,
        cancel: &CancellationToken,
    ) -> Result<Option<usize>> {
        let mut chain = self.lock(cancel).await?;
        let current = chain.layout();
        let (next, reply) = match op {
            ControlOp::Reset => (self.defaults, None),
            ControlOp::SetQuantum(quantum) => (Layout::new(quantum, current.qset())?, None),
            ControlOp::GetQuantum => (current, Some(current.quantum())),
            ControlOp::ExchangeQuantum(quantum) | ControlOp::ShiftQuantum(quantum) => (
                Layout::new(quantum, current.qset())?,
                Some(current.quantum()),
            ),
            ControlOp::SetQset(qset) => (Layout::new(current.quantum(), qset)?, None),
            ControlOp::GetQset => (current, Some(current.qset())),
            ControlOp::ExchangeQset(qset) | ControlOp::ShiftQset(qset) => (
                Layout::new(current.quantum(), qset)?,
                Some(current.qset()),
            ),
        };
        if next != current {
            tracing::debug!(
                device = self.index,
                quantum = next.quantum(),
                qset = next.qset(),
                "Changed store layout"
            );
            chain.set_layout(next);
        }
        Ok(reply)
    }

    /// Registers a mapped view. Taken under the guard so it cannot slip past a
    /// trim that is already checking the count.
    pub async fn map_begin(&self, cancel: &CancellationToken) -> Result<usize> {
        let _chain = self.lock(cancel).await?;
        Ok(self.mapped_views.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Drops a mapped view registration.
    pub fn map_end(&self) -> usize {
        let result = self
            .mapped_views
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match result {
            Ok(previous) => previous - 1,
            Err(_) => {
                tracing::warn!(device = self.index, "map_end without a matching map_begin");
                0
            }
        }
    }

    /// Opens a view that keeps the store from being trimmed until dropped.
    pub async fn map(self: &Arc<Self>, cancel: &CancellationToken) -> Result<MappedView> {
        self.map_begin(cancel).await?;
        Ok(MappedView::new(self.clone()))
    }

    pub fn mapped_views(&self) -> usize {
        self.mapped_views.load(Ordering::SeqCst)
    }

    /// Copy of the whole block holding `offset`, or `None` for a hole.
    pub async fn block_at(
        &self,
        offset: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>> {
        let chain = self.lock(cancel).await?;
        Ok(chain.block_at(offset).map(|block| block.to_vec()))
    }

    pub async fn report(&self, cancel: &CancellationToken) -> Result<StoreReport> {
        let chain = self.lock(cancel).await?;
        Ok(StoreReport::capture(self.index, &chain, self.mapped_views()))
    }

    /// Report without waiting; `None` while another call holds the guard.
    pub fn try_report(&self) -> Option<StoreReport> {
        let chain = self.chain.try_lock().ok()?;
        Some(StoreReport::capture(self.index, &chain, self.mapped_views()))
    }
}

#[async_trait::async_trait]
impl Store for SparseStore {
    async fn read_at(
        &self,
        offset: u64,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        self.read(offset, buf, cancel).await
    }

    async fn write_at(
        &self,
        offset: u64,
        buf: &[u8],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        self.write(offset, buf, cancel).await
    }

    async fn size(&self, cancel: &CancellationToken) -> Result<u64> {
        SparseStore::size(self, cancel).await
    }

    async fn trim(&self, cancel: &CancellationToken) -> Result<()> {
        SparseStore::trim(self, cancel).await
    }
}
