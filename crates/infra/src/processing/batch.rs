//! Bounded batching of line records into the metadata store.

use std::sync::Arc;

use tracing::{debug, warn};

use filepipe_core::LineRecord;

use crate::metadata_store::{MetadataStore, MetadataStoreError};

/// Running totals over every flushed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTotals {
    pub batches: usize,
    pub inserted: usize,
    pub rejected: usize,
}

/// Accumulates records and writes them in batches of `batch_size`.
///
/// Batches are flushed in the order records were pushed; at most one batch is
/// held in memory.
pub struct LineBatcher {
    store: Arc<dyn MetadataStore>,
    batch_size: usize,
    pending: Vec<LineRecord>,
    totals: BatchTotals,
}

impl LineBatcher {
    pub fn new(store: Arc<dyn MetadataStore>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            batch_size,
            pending: Vec::with_capacity(batch_size),
            totals: BatchTotals::default(),
        }
    }

    pub async fn push(&mut self, record: LineRecord) -> Result<(), MetadataStoreError> {
        self.pending.push(record);
        if self.pending.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write whatever is pending, even a partial batch.
    pub async fn flush(&mut self) -> Result<(), MetadataStoreError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let batch = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
        let size = batch.len();
        let report = self.store.insert_lines(batch).await?;

        self.totals.batches += 1;
        self.totals.inserted += report.inserted;
        self.totals.rejected += report.rejected.len();

        if report.has_rejections() {
            warn!(
                rejected = report.rejected.len(),
                first_line = report.rejected.first().copied(),
                "line records rejected by metadata store"
            );
        }
        debug!(size, inserted = report.inserted, "flushed line batch");
        Ok(())
    }

    pub fn totals(&self) -> BatchTotals {
        self.totals
    }
}
