//! Caller-facing operations: register files and request their processing.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use filepipe_core::{DomainError, FileId, FileRecord, FileStatus, FileUpdate, NewFile};

use crate::jobs::{Job, JobId, JobQueue, QueueError};
use crate::metadata_store::{MetadataStore, MetadataStoreError};
use crate::processing::FileProcessor;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Unknown file or job, or a file that is already processing.
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Store(#[from] MetadataStoreError),
}

/// Front door for callers (CLI, HTTP handlers).
///
/// Duplicate-run rejection lives here; the dispatcher itself accepts any job.
#[derive(Clone)]
pub struct ProcessingService {
    queue: JobQueue,
    metadata: Arc<dyn MetadataStore>,
}

impl ProcessingService {
    pub fn new(queue: JobQueue, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { queue, metadata }
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Record an object that is already in the blob store as `uploaded`.
    pub async fn register_file(&self, new: NewFile) -> Result<FileRecord, ServiceError> {
        let record = FileRecord::uploaded(FileId::new(), new);
        self.metadata.insert_file(record.clone()).await?;
        info!(file_id = %record.file_id, locator = %record.locator, "file registered");
        Ok(record)
    }

    pub async fn file(&self, file_id: &FileId) -> Result<FileRecord, ServiceError> {
        self.metadata
            .find_file(file_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("file {file_id}")).into())
    }

    /// Schedule a processing job for `file_id`.
    ///
    /// The record is marked `queued` with the job id before the job is
    /// submitted, so the processor's `processing` update always lands after it.
    pub async fn request_processing(&self, file_id: &FileId) -> Result<Job, ServiceError> {
        let record = self.file(file_id).await?;
        if record.status == FileStatus::Processing {
            let conflict = DomainError::conflict(format!("file {file_id} is already processing"));
            return Err(conflict.into());
        }

        let job = Job::new(FileProcessor::payload_for(*file_id));
        self.metadata
            .update_file(file_id, FileUpdate::Queued { job_id: job.id })
            .await?;

        match self.queue.submit(job) {
            Ok(job) => {
                info!(%file_id, job_id = %job.id, "processing requested");
                Ok(job)
            }
            Err(err) => {
                let update = FileUpdate::Failed {
                    error: err.to_string(),
                };
                if let Err(mark_err) = self.metadata.update_file(file_id, update).await {
                    warn!(%file_id, error = %mark_err, "could not mark file failed");
                }
                Err(err.into())
            }
        }
    }

    pub async fn job(&self, job_id: &JobId) -> Result<Job, ServiceError> {
        self.queue
            .get_job(*job_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("job {job_id}")).into())
    }
}
