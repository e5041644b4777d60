//! The job handler that ingests one file.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use filepipe_core::{FileId, FileRecord, FileUpdate};

use crate::blob_store::{BlobStore, BlobStoreError};
use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_LINE_BYTES};
use crate::jobs::{Job, JobHandler};
use crate::metadata_store::{MetadataStore, MetadataStoreError};

use super::batch::{BatchTotals, LineBatcher};
use super::framer::{FramingError, LineFramer};
use super::interpret::interpret_line;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorSettings {
    pub batch_size: usize,
    pub max_line_bytes: usize,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
        }
    }
}

/// Failure of one processing attempt.
///
/// Every variant fails the job attempt; the dispatcher retries them alike.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("invalid job payload: {0}")]
    InvalidPayload(String),
    #[error("file record not found: {0}")]
    FileNotFound(FileId),
    #[error(transparent)]
    Blob(#[from] BlobStoreError),
    #[error(transparent)]
    Metadata(#[from] MetadataStoreError),
    #[error(transparent)]
    Framing(#[from] FramingError),
}

/// Result of a completed ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingSummary {
    pub file_id: FileId,
    /// Non-blank lines seen, the value recorded as `processed_lines`.
    pub processed_lines: u64,
    pub batches: BatchTotals,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilePayload {
    file_id: FileId,
}

/// Streams a file from the blob store into line records.
pub struct FileProcessor {
    blobs: Arc<dyn BlobStore>,
    metadata: Arc<dyn MetadataStore>,
    settings: ProcessorSettings,
}

impl FileProcessor {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn MetadataStore>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            blobs,
            metadata,
            settings,
        }
    }

    /// Job payload naming `file_id`.
    pub fn payload_for(file_id: FileId) -> serde_json::Value {
        serde_json::json!({ "fileId": file_id })
    }

    /// Run one processing attempt for `job`.
    ///
    /// Once the record is marked `processing`, any failure marks it `failed`
    /// with the error message before being returned.
    #[instrument(skip(self, job), fields(job_id = %job.id, attempt = job.attempts))]
    pub async fn process(&self, job: &Job) -> Result<ProcessingSummary, ProcessingError> {
        let payload: FilePayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| ProcessingError::InvalidPayload(e.to_string()))?;
        let file_id = payload.file_id;

        let record = self
            .metadata
            .find_file(&file_id)
            .await?
            .ok_or(ProcessingError::FileNotFound(file_id))?;

        self.metadata
            .update_file(
                &file_id,
                FileUpdate::Processing {
                    job_id: job.id,
                    started_at: Utc::now(),
                },
            )
            .await?;

        match self.ingest(&record).await {
            Ok(summary) => {
                info!(
                    %file_id,
                    processed = summary.processed_lines,
                    rejected = summary.batches.rejected,
                    "file processed"
                );
                Ok(summary)
            }
            Err(err) => {
                let update = FileUpdate::Failed {
                    error: err.to_string(),
                };
                if let Err(mark_err) = self.metadata.update_file(&file_id, update).await {
                    warn!(%file_id, error = %mark_err, "could not mark file failed");
                }
                Err(err)
            }
        }
    }

    async fn ingest(&self, record: &FileRecord) -> Result<ProcessingSummary, ProcessingError> {
        let file_id = record.file_id;
        let mut stream = self.blobs.get(&record.locator).await?;
        let mut framer = LineFramer::new(self.settings.max_line_bytes);
        let mut batcher = LineBatcher::new(Arc::clone(&self.metadata), self.settings.batch_size);
        let mut processed: u64 = 0;

        while let Some(chunk) = stream.next().await {
            framer.push(&chunk?);
            while let Some(line) = framer.next_line()? {
                processed = accept(file_id, processed, &line, &mut batcher).await?;
            }
        }
        if let Some(line) = framer.finish()? {
            processed = accept(file_id, processed, &line, &mut batcher).await?;
        }
        batcher.flush().await?;

        self.metadata
            .update_file(
                &file_id,
                FileUpdate::Completed {
                    processed_lines: processed,
                    finished_at: Utc::now(),
                },
            )
            .await?;

        Ok(ProcessingSummary {
            file_id,
            processed_lines: processed,
            batches: batcher.totals(),
        })
    }
}

/// Batch `line` if it is non-blank; returns the updated non-blank line count.
async fn accept(
    file_id: FileId,
    processed: u64,
    line: &str,
    batcher: &mut LineBatcher,
) -> Result<u64, ProcessingError> {
    match interpret_line(file_id, processed + 1, line) {
        Some(record) => {
            batcher.push(record).await?;
            Ok(processed + 1)
        }
        None => Ok(processed),
    }
}

#[async_trait]
impl JobHandler for FileProcessor {
    async fn handle(&self, job: Job) -> anyhow::Result<()> {
        self.process(&job).await?;
        Ok(())
    }
}
