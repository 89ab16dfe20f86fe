use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::sparse::SparseStore;
use crate::error::Result;

/// An open mapping over a store. While any view is alive the store refuses
/// to trim; dropping the view releases it.
#[derive(Debug)]
pub struct MappedView {
    store: Arc<SparseStore>,
}

impl MappedView {
    pub(crate) fn new(store: Arc<SparseStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<SparseStore> {
        &self.store
    }

    /// Pages in the whole block backing `offset`. `None` means a hole.
    pub async fn fault(&self, offset: u64, cancel: &CancellationToken) -> Result<Option<Vec<u8>>> {
        self.store.block_at(offset, cancel).await
    }
}

impl Drop for MappedView {
    fn drop(&mut self) {
        self.store.map_end();
    }
}
