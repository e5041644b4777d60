//! File metadata records.
//!
//! A `FileRecord` is owned by the metadata store; the ingestion pipeline only
//! reads its locator and drives its status through typed `FileUpdate`s.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{FileId, JobId};

/// Where a file's bytes live in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobLocator {
    pub bucket: String,
    pub key: String,
}

impl BlobLocator {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl core::fmt::Display for BlobLocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Processing status of an uploaded file.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Uploaded,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Uploaded => "uploaded",
            FileStatus::Queued => "queued",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(FileStatus::Uploaded),
            "queued" => Ok(FileStatus::Queued),
            "processing" => Ok(FileStatus::Processing),
            "completed" => Ok(FileStatus::Completed),
            "failed" => Ok(FileStatus::Failed),
            other => Err(DomainError::validation(format!("unknown file status: {other}"))),
        }
    }
}

/// Descriptor for registering an object that already sits in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFile {
    pub locator: BlobLocator,
    pub original_name: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
}

impl NewFile {
    pub fn new(locator: BlobLocator) -> Self {
        Self {
            locator,
            original_name: None,
            mime_type: None,
            size: None,
        }
    }

    pub fn with_original_name(mut self, name: impl Into<String>) -> Self {
        self.original_name = Some(name.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// Metadata for one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_id: FileId,
    pub locator: BlobLocator,
    pub original_name: Option<String>,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
    pub status: FileStatus,
    /// Most recent job scheduled against this file.
    pub last_job_id: Option<JobId>,
    /// Count of non-blank lines, set when processing completes.
    pub processed_lines: Option<u64>,
    pub processing_error: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// Build a fresh `uploaded` record.
    pub fn uploaded(file_id: FileId, new: NewFile) -> Self {
        let now = Utc::now();
        Self {
            file_id,
            locator: new.locator,
            original_name: new.original_name,
            mime_type: new.mime_type,
            size: new.size,
            status: FileStatus::Uploaded,
            last_job_id: None,
            processed_lines: None,
            processing_error: None,
            processing_started_at: None,
            processing_finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial change and bump `updated_at`.
    pub fn apply(&mut self, update: &FileUpdate) {
        match update {
            FileUpdate::Queued { job_id } => {
                self.status = FileStatus::Queued;
                self.last_job_id = Some(*job_id);
            }
            FileUpdate::Processing { job_id, started_at } => {
                self.status = FileStatus::Processing;
                self.last_job_id = Some(*job_id);
                self.processing_started_at = Some(*started_at);
                self.processing_error = None;
            }
            FileUpdate::Completed {
                processed_lines,
                finished_at,
            } => {
                self.status = FileStatus::Completed;
                self.processed_lines = Some(*processed_lines);
                self.processing_finished_at = Some(*finished_at);
            }
            FileUpdate::Failed { error } => {
                self.status = FileStatus::Failed;
                self.processing_error = Some(error.clone());
            }
        }
        self.updated_at = Utc::now();
    }
}

/// Partial change to a `FileRecord`, one variant per status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileUpdate {
    Queued {
        job_id: JobId,
    },
    Processing {
        job_id: JobId,
        started_at: DateTime<Utc>,
    },
    Completed {
        processed_lines: u64,
        finished_at: DateTime<Utc>,
    },
    Failed {
        error: String,
    },
}

impl FileUpdate {
    pub fn status(&self) -> FileStatus {
        match self {
            FileUpdate::Queued { .. } => FileStatus::Queued,
            FileUpdate::Processing { .. } => FileStatus::Processing,
            FileUpdate::Completed { .. } => FileStatus::Completed,
            FileUpdate::Failed { .. } => FileStatus::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FileRecord {
        FileRecord::uploaded(
            FileId::new(),
            NewFile::new(BlobLocator::new("uploads", "a.jsonl")).with_size(12),
        )
    }

    #[test]
    fn status_parses_its_own_rendering() {
        for status in [
            FileStatus::Uploaded,
            FileStatus::Queued,
            FileStatus::Processing,
            FileStatus::Completed,
            FileStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<FileStatus>().unwrap(), status);
        }
        assert!("archived".parse::<FileStatus>().is_err());
    }

    #[test]
    fn processing_clears_previous_error() {
        let mut rec = record();
        rec.apply(&FileUpdate::Failed {
            error: "boom".to_string(),
        });
        assert_eq!(rec.status, FileStatus::Failed);
        assert_eq!(rec.processing_error.as_deref(), Some("boom"));

        let job_id = JobId::new();
        rec.apply(&FileUpdate::Processing {
            job_id,
            started_at: Utc::now(),
        });
        assert_eq!(rec.status, FileStatus::Processing);
        assert_eq!(rec.last_job_id, Some(job_id));
        assert!(rec.processing_error.is_none());
    }

    #[test]
    fn completed_records_line_count() {
        let mut rec = record();
        rec.apply(&FileUpdate::Completed {
            processed_lines: 2,
            finished_at: Utc::now(),
        });
        assert_eq!(rec.status, FileStatus::Completed);
        assert_eq!(rec.processed_lines, Some(2));
        assert!(rec.processing_finished_at.is_some());
    }
}
