//! Numbered store instances and per-open handles.
//!
//! A [`DeviceSet`] owns N independent [`SparseStore`]s that share only the
//! process-wide block pools. [`DeviceSet::open`] hands out a [`Handle`] carrying
//! a cursor and an interrupt token; the handle is the request surface for
//! read, write, seek, control and mapping.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    completion::{Completion, CompletionQueue, Kind, Request},
    config::DeviceConfig,
    control::ControlOp,
    error::{Error, Result},
    metrics::MetricsTask,
    scheduler::Scheduler,
    store::{MappedView, SparseStore, StoreReport, Whence},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl OpenMode {
    pub fn can_read(self) -> bool {
        self != OpenMode::WriteOnly
    }

    pub fn can_write(self) -> bool {
        self != OpenMode::ReadOnly
    }
}

pub struct DeviceSet {
    config: DeviceConfig,
    stores: Vec<Arc<SparseStore>>,
    queues: Vec<CompletionQueue>,
    scheduler: Arc<Scheduler>,
}

impl DeviceSet {
    /// Builds the stores described by `config`. Must be called within a Tokio runtime.
    pub fn new(config: DeviceConfig) -> Result<Self> {
        config.validate()?;

        let scheduler = Arc::new(Scheduler::new());
        let stores = (0..config.devices)
            .map(|index| SparseStore::from_config(index, &config).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        let queues = stores
            .iter()
            .map(|store| {
                CompletionQueue::new(store.clone(), scheduler.clone(), config.completion_delay)
            })
            .collect();

        if let Some(interval) = config.metrics_interval {
            scheduler.register(Arc::new(MetricsTask::new(stores.clone(), interval)));
        }

        tracing::info!(
            devices = config.devices,
            quantum = config.quantum,
            qset = config.qset,
            "Device set ready"
        );

        Ok(Self {
            config,
            stores,
            queues,
            scheduler,
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn store(&self, index: usize) -> Option<&Arc<SparseStore>> {
        self.stores.get(index)
    }

    /// Opens instance `index`. A write-only open truncates the store first;
    /// a failed truncation does not fail the open.
    pub async fn open(&self, index: usize, mode: OpenMode) -> Result<Handle> {
        let store = self.stores.get(index).ok_or(Error::NoSuchDevice(index))?;
        let queue = self.queues[index].clone();
        let handle = Handle {
            store: store.clone(),
            queue,
            mode,
            position: 0,
            cancel: CancellationToken::new(),
        };

        if mode == OpenMode::WriteOnly {
            if let Err(e) = store.trim(&handle.cancel).await {
                tracing::warn!(
                    device = index,
                    error = %e,
                    "Ignoring failed trim on write-only open"
                );
            }
        }
        Ok(handle)
    }

    /// Status of every instance, in index order.
    pub async fn report(&self, cancel: &CancellationToken) -> Result<String> {
        let mut out = String::new();
        for store in &self.stores {
            let report: StoreReport = store.report(cancel).await?;
            out.push('\n');
            out.push_str(&report.to_string());
        }
        Ok(out)
    }

    pub fn collect_metrics(&self) -> Result<()> {
        crate::metrics::collect_metrics(&self.stores)
    }

    /// Waits for deferred completions, then trims every store. Every store is
    /// attempted; the first failure is returned.
    pub async fn shutdown(self) -> Result<()> {
        self.scheduler.shutdown().await?;

        let cancel = CancellationToken::new();
        let mut first_error = None;
        for store in &self.stores {
            if let Err(e) = store.trim(&cancel).await {
                tracing::warn!(device = store.index(), error = %e, "Trim at shutdown failed");
                first_error.get_or_insert(e);
            }
        }
        tracing::info!(devices = self.stores.len(), "Device set shut down");
        first_error.map_or(Ok(()), Err)
    }
}

/// An open store: a cursor plus an interrupt token.
///
/// [`interrupter`](Handle::interrupter) hands out the token so another task can
/// break a call out of a guard wait. Once fired, later calls fail with
/// [`Error::Interrupted`] until [`clear_interrupt`](Handle::clear_interrupt).
pub struct Handle {
    store: Arc<SparseStore>,
    queue: CompletionQueue,
    mode: OpenMode,
    position: u64,
    cancel: CancellationToken,
}

impl Handle {
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn store(&self) -> &Arc<SparseStore> {
        &self.store
    }

    pub fn interrupter(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn clear_interrupt(&mut self) {
        self.cancel = CancellationToken::new();
    }

    /// Reads up to `len` bytes at the cursor, never past the end of the
    /// current block. An empty result means end of data or a hole.
    pub async fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        if !self.mode.can_read() {
            return Err(Error::BadMode);
        }
        let mut buf = vec![0u8; len];
        let n = self.store.read(self.position, &mut buf, &self.cancel).await?;
        buf.truncate(n);
        self.position += n as u64;
        Ok(buf)
    }

    /// Writes at the cursor, at most up to the end of the current block.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.mode.can_write() {
            return Err(Error::BadMode);
        }
        let n = self.store.write(self.position, buf, &self.cancel).await?;
        self.position += n as u64;
        Ok(n)
    }

    /// Repeats single-block writes until all of `buf` is stored.
    pub async fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Repeats single-block reads until `len` bytes, a hole or the end of data.
    pub async fn read_to_hole(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let chunk = self.read(len - out.len()).await?;
            if chunk.is_empty() {
                break;
            }
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    pub async fn seek(&mut self, off: i64, whence: Whence) -> Result<u64> {
        self.position = self
            .store
            .seek(self.position, off, whence, &self.cancel)
            .await?;
        Ok(self.position)
    }

    pub async fn control(&self, op: ControlOp) -> Result<Option<usize>> {
        self.store.control(op, &self.cancel).await
    }

    /// Decodes and applies a raw control command.
    pub async fn ioctl(&self, cmd: u32, arg: i64) -> Result<Option<usize>> {
        self.control(ControlOp::decode(cmd, arg)?).await
    }

    pub async fn map(&self) -> Result<MappedView> {
        self.store.map(&self.cancel).await
    }

    /// Submits a request through the store's completion queue. The request
    /// carries its own offset; the cursor does not move.
    pub async fn submit(&self, request: Request) -> Completion {
        let allowed = match request.kind() {
            Kind::Read => self.mode.can_read(),
            Kind::Write => self.mode.can_write(),
        };
        if !allowed {
            return Completion::rejected(Error::BadMode);
        }
        self.queue.submit(request, &self.cancel).await
    }

    pub fn close(self) -> Result<()> {
        Ok(())
    }
}
