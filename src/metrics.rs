use std::{sync::Arc, time::Duration};

use crate::{
    error::Result,
    pool::BlockPool,
    scheduler::{BackgroundTask, Context},
    store::SparseStore,
};

/// Collect metrics from every store and shared pool and log them
pub fn collect_metrics(stores: &[Arc<SparseStore>]) -> Result<()> {
    for store in stores {
        match store.try_report() {
            Some(report) => tracing::info!(
                device = report.index,
                size = report.size,
                quantum = report.quantum,
                qset = report.qset,
                nodes = report.nodes.len(),
                blocks = report.blocks,
                mapped_views = report.mapped_views,
                "Store metrics"
            ),
            // busy: skip rather than stall behind a writer
            None => tracing::debug!(device = store.index(), "Store busy, metrics skipped"),
        }
    }

    for pool in BlockPool::shared_pools() {
        let stats = pool.stats();
        tracing::info!(
            quantum = stats.quantum,
            allocated = stats.allocated,
            reused = stats.reused,
            released = stats.released,
            outstanding = stats.outstanding,
            idle = stats.idle,
            "Block pool metrics"
        );
    }

    Ok(())
}

pub struct MetricsTask {
    stores: Vec<Arc<SparseStore>>,
    interval: Duration,
}

impl MetricsTask {
    pub fn new(stores: Vec<Arc<SparseStore>>, interval: Duration) -> Self {
        Self { stores, interval }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for MetricsTask {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self, _ctx: Context) -> Result<()> {
        collect_metrics(&self.stores)
    }
}
