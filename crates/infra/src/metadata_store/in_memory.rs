use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use filepipe_core::{FileId, FileRecord, FileUpdate, LineRecord};

use super::{BatchInsertReport, MetadataStore, MetadataStoreError};

/// In-memory metadata store.
///
/// Intended for tests/dev. Lines are keyed by `(file_id, line_number)` with the
/// same uniqueness rule the Postgres schema enforces.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    files: RwLock<HashMap<FileId, FileRecord>>,
    lines: RwLock<HashMap<FileId, BTreeMap<u64, LineRecord>>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> MetadataStoreError {
    MetadataStoreError::Corrupt("lock poisoned".to_string())
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn insert_file(&self, record: FileRecord) -> Result<(), MetadataStoreError> {
        let mut files = self.files.write().map_err(|_| poisoned())?;
        if files.contains_key(&record.file_id) {
            return Err(MetadataStoreError::AlreadyExists(record.file_id));
        }
        files.insert(record.file_id, record);
        Ok(())
    }

    async fn find_file(&self, file_id: &FileId) -> Result<Option<FileRecord>, MetadataStoreError> {
        let files = self.files.read().map_err(|_| poisoned())?;
        Ok(files.get(file_id).cloned())
    }

    async fn update_file(
        &self,
        file_id: &FileId,
        update: FileUpdate,
    ) -> Result<FileRecord, MetadataStoreError> {
        let mut files = self.files.write().map_err(|_| poisoned())?;
        let record = files
            .get_mut(file_id)
            .ok_or(MetadataStoreError::NotFound(*file_id))?;
        record.apply(&update);
        Ok(record.clone())
    }

    async fn insert_lines(
        &self,
        records: Vec<LineRecord>,
    ) -> Result<BatchInsertReport, MetadataStoreError> {
        let mut lines = self.lines.write().map_err(|_| poisoned())?;
        let mut report = BatchInsertReport::default();

        for record in records {
            let per_file = lines.entry(record.file_id).or_default();
            if per_file.contains_key(&record.line_number) {
                report.rejected.push(record.line_number);
                continue;
            }
            per_file.insert(record.line_number, record);
            report.inserted += 1;
        }

        Ok(report)
    }

    async fn list_lines(&self, file_id: &FileId) -> Result<Vec<LineRecord>, MetadataStoreError> {
        let lines = self.lines.read().map_err(|_| poisoned())?;
        Ok(lines
            .get(file_id)
            .map(|per_file| per_file.values().cloned().collect())
            .unwrap_or_default())
    }
}
