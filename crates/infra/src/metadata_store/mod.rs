//! Metadata store boundary: file records and the lines derived from them.

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryMetadataStore;
pub use postgres::PostgresMetadataStore;

use async_trait::async_trait;
use thiserror::Error;

use filepipe_core::{FileId, FileRecord, FileUpdate, LineRecord};

/// Metadata store operation error.
#[derive(Debug, Error)]
pub enum MetadataStoreError {
    #[error("file record not found: {0}")]
    NotFound(FileId),
    #[error("file record already exists: {0}")]
    AlreadyExists(FileId),
    /// A stored row could not be mapped back into a record.
    #[error("corrupt metadata: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of a batch insert.
///
/// Records are independent: one rejected record does not prevent the others
/// from being stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchInsertReport {
    pub inserted: usize,
    /// Line numbers that were not stored (already present for that file).
    pub rejected: Vec<u64>,
}

impl BatchInsertReport {
    pub fn has_rejections(&self) -> bool {
        !self.rejected.is_empty()
    }
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert_file(&self, record: FileRecord) -> Result<(), MetadataStoreError>;

    async fn find_file(&self, file_id: &FileId) -> Result<Option<FileRecord>, MetadataStoreError>;

    /// Apply `update` and return the resulting record.
    async fn update_file(
        &self,
        file_id: &FileId,
        update: FileUpdate,
    ) -> Result<FileRecord, MetadataStoreError>;

    /// Store a batch of line records, each independently.
    async fn insert_lines(
        &self,
        records: Vec<LineRecord>,
    ) -> Result<BatchInsertReport, MetadataStoreError>;

    /// All stored lines of a file, ordered by line number.
    async fn list_lines(&self, file_id: &FileId) -> Result<Vec<LineRecord>, MetadataStoreError>;
}
