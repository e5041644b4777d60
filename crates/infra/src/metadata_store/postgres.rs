//! Postgres-backed metadata store.
//!
//! ## Schema
//!
//! - `uploads`: one row per file, keyed by `file_id`.
//! - `processed_lines`: one row per non-blank line, primary key
//!   `(file_id, line_number)`. The key is what makes retried batches idempotent:
//!   a line that was already stored is skipped and reported as rejected.
//!
//! ## Error Mapping
//!
//! | Situation | MetadataStoreError |
//! |-----------|--------------------|
//! | unique violation (`23505`) on `uploads` | `AlreadyExists` |
//! | update of a missing `file_id` | `NotFound` |
//! | row that does not map back to a record | `Corrupt` |
//! | anything else from SQLx | `Database` |

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use filepipe_core::{
    BlobLocator, FileId, FileRecord, FileStatus, FileUpdate, JobId, LineOutcome, LineRecord,
};

use super::{BatchInsertReport, MetadataStore, MetadataStoreError};

/// Rows per multi-row INSERT; keeps bind parameters under Postgres' 65535 cap.
const MAX_ROWS_PER_STATEMENT: usize = 5_000;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS uploads (
        file_id UUID PRIMARY KEY,
        bucket TEXT NOT NULL,
        object_key TEXT NOT NULL,
        original_name TEXT,
        mime_type TEXT,
        size BIGINT,
        status TEXT NOT NULL,
        last_job_id UUID,
        processed_lines BIGINT,
        processing_error TEXT,
        processing_started_at TIMESTAMPTZ,
        processing_finished_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS processed_lines (
        file_id UUID NOT NULL,
        line_number BIGINT NOT NULL CHECK (line_number > 0),
        raw_text TEXT NOT NULL,
        state TEXT NOT NULL,
        payload JSONB,
        error TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (file_id, line_number)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS uploads_status_idx ON uploads (status)",
];

const FILE_COLUMNS: &str = "file_id, bucket, object_key, original_name, mime_type, size, status, \
     last_job_id, processed_lines, processing_error, processing_started_at, \
     processing_finished_at, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresMetadataStore {
    pool: Arc<PgPool>,
}

impl PostgresMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, MetadataStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), MetadataStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&*self.pool).await?;
        }
        info!("metadata schema ready");
        Ok(())
    }

    async fn insert_chunk(&self, rows: &[LineRow]) -> Result<Vec<u64>, MetadataStoreError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO processed_lines \
             (file_id, line_number, raw_text, state, payload, error, created_at) ",
        );
        builder.push_values(rows, |mut b, row| {
            b.push_bind(row.file_id)
                .push_bind(row.line_number)
                .push_bind(&row.raw_text)
                .push_bind(&row.state)
                .push_bind(&row.payload)
                .push_bind(&row.error)
                .push_bind(row.created_at);
        });
        builder.push(" ON CONFLICT (file_id, line_number) DO NOTHING RETURNING line_number");

        let returned = builder.build().fetch_all(&*self.pool).await?;
        returned
            .iter()
            .map(|r| -> Result<u64, MetadataStoreError> {
                let n: i64 = r.try_get("line_number")?;
                to_u64("line_number", n)
            })
            .collect()
    }
}

#[async_trait]
impl MetadataStore for PostgresMetadataStore {
    #[instrument(skip(self, record), fields(file_id = %record.file_id), err)]
    async fn insert_file(&self, record: FileRecord) -> Result<(), MetadataStoreError> {
        let size = record.size.map(|s| to_i64("size", s)).transpose()?;
        let processed = record
            .processed_lines
            .map(|n| to_i64("processed_lines", n))
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO uploads (
                file_id, bucket, object_key, original_name, mime_type, size, status,
                last_job_id, processed_lines, processing_error, processing_started_at,
                processing_finished_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(*record.file_id.as_uuid())
        .bind(&record.locator.bucket)
        .bind(&record.locator.key)
        .bind(&record.original_name)
        .bind(&record.mime_type)
        .bind(size)
        .bind(record.status.as_str())
        .bind(record.last_job_id.map(Uuid::from))
        .bind(processed)
        .bind(&record.processing_error)
        .bind(record.processing_started_at)
        .bind(record.processing_finished_at)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                MetadataStoreError::AlreadyExists(record.file_id)
            } else {
                MetadataStoreError::Database(e)
            }
        })?;

        Ok(())
    }

    async fn find_file(&self, file_id: &FileId) -> Result<Option<FileRecord>, MetadataStoreError> {
        let row = sqlx::query(&format!("SELECT {FILE_COLUMNS} FROM uploads WHERE file_id = $1"))
            .bind(*file_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await?;

        row.map(|r| FileRecord::try_from(FileRow::from_row(&r)?))
            .transpose()
    }

    #[instrument(skip(self, update), fields(file_id = %file_id, status = %update.status()), err)]
    async fn update_file(
        &self,
        file_id: &FileId,
        update: FileUpdate,
    ) -> Result<FileRecord, MetadataStoreError> {
        let status = update.status().as_str();
        let sql = match &update {
            FileUpdate::Queued { .. } => "status = $2, last_job_id = $3",
            FileUpdate::Processing { .. } => {
                "status = $2, last_job_id = $3, processing_started_at = $4, processing_error = NULL"
            }
            FileUpdate::Completed { .. } => {
                "status = $2, processed_lines = $3, processing_finished_at = $4"
            }
            FileUpdate::Failed { .. } => "status = $2, processing_error = $3",
        };
        let sql = format!(
            "UPDATE uploads SET {sql}, updated_at = NOW() \
             WHERE file_id = $1 RETURNING {FILE_COLUMNS}"
        );

        let query = sqlx::query(&sql).bind(*file_id.as_uuid()).bind(status);
        let query = match &update {
            FileUpdate::Queued { job_id } => query.bind(Uuid::from(*job_id)),
            FileUpdate::Processing { job_id, started_at } => {
                query.bind(Uuid::from(*job_id)).bind(*started_at)
            }
            FileUpdate::Completed {
                processed_lines,
                finished_at,
            } => query
                .bind(to_i64("processed_lines", *processed_lines)?)
                .bind(*finished_at),
            FileUpdate::Failed { error } => query.bind(error.clone()),
        };

        let row = query
            .fetch_optional(&*self.pool)
            .await?
            .ok_or(MetadataStoreError::NotFound(*file_id))?;

        FileRecord::try_from(FileRow::from_row(&row)?)
    }

    #[instrument(skip(self, records), fields(count = records.len()), err)]
    async fn insert_lines(
        &self,
        records: Vec<LineRecord>,
    ) -> Result<BatchInsertReport, MetadataStoreError> {
        if records.is_empty() {
            return Ok(BatchInsertReport::default());
        }

        let rows = records
            .into_iter()
            .map(LineRow::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let mut report = BatchInsertReport::default();
        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let stored = self.insert_chunk(chunk).await?;
            let submitted: Vec<u64> = chunk.iter().map(|r| r.line_number as u64).collect();
            let chunk_report = reconcile(&submitted, stored);
            report.inserted += chunk_report.inserted;
            report.rejected.extend(chunk_report.rejected);
        }

        debug!(inserted = report.inserted, rejected = report.rejected.len(), "stored line batch");
        Ok(report)
    }

    async fn list_lines(&self, file_id: &FileId) -> Result<Vec<LineRecord>, MetadataStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT file_id, line_number, raw_text, state, payload, error, created_at
            FROM processed_lines
            WHERE file_id = $1
            ORDER BY line_number ASC
            "#,
        )
        .bind(*file_id.as_uuid())
        .fetch_all(&*self.pool)
        .await?;

        rows.iter()
            .map(|r| LineRecord::try_from(LineRow::from_row(r)?))
            .collect()
    }
}

/// Split the submitted line numbers into stored vs. rejected, given the line
/// numbers the INSERT returned. Handles the same line number submitted twice in
/// one statement (only one copy can be stored).
fn reconcile(submitted: &[u64], stored: Vec<u64>) -> BatchInsertReport {
    let mut remaining: HashMap<u64, usize> = HashMap::new();
    for n in stored {
        *remaining.entry(n).or_default() += 1;
    }

    let mut report = BatchInsertReport::default();
    for &n in submitted {
        match remaining.get_mut(&n) {
            Some(count) if *count > 0 => {
                *count -= 1;
                report.inserted += 1;
            }
            _ => report.rejected.push(n),
        }
    }
    report
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

fn to_i64(column: &str, value: u64) -> Result<i64, MetadataStoreError> {
    i64::try_from(value)
        .map_err(|_| MetadataStoreError::Corrupt(format!("{column} out of range: {value}")))
}

fn to_u64(column: &str, value: i64) -> Result<u64, MetadataStoreError> {
    u64::try_from(value)
        .map_err(|_| MetadataStoreError::Corrupt(format!("negative {column}: {value}")))
}

// SQLx row types

#[derive(Debug)]
struct FileRow {
    file_id: Uuid,
    bucket: String,
    object_key: String,
    original_name: Option<String>,
    mime_type: Option<String>,
    size: Option<i64>,
    status: String,
    last_job_id: Option<Uuid>,
    processed_lines: Option<i64>,
    processing_error: Option<String>,
    processing_started_at: Option<DateTime<Utc>>,
    processing_finished_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for FileRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(FileRow {
            file_id: row.try_get("file_id")?,
            bucket: row.try_get("bucket")?,
            object_key: row.try_get("object_key")?,
            original_name: row.try_get("original_name")?,
            mime_type: row.try_get("mime_type")?,
            size: row.try_get("size")?,
            status: row.try_get("status")?,
            last_job_id: row.try_get("last_job_id")?,
            processed_lines: row.try_get("processed_lines")?,
            processing_error: row.try_get("processing_error")?,
            processing_started_at: row.try_get("processing_started_at")?,
            processing_finished_at: row.try_get("processing_finished_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<FileRow> for FileRecord {
    type Error = MetadataStoreError;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        let status: FileStatus = row
            .status
            .parse()
            .map_err(|e| MetadataStoreError::Corrupt(format!("{e}")))?;

        Ok(FileRecord {
            file_id: FileId::from_uuid(row.file_id),
            locator: BlobLocator::new(row.bucket, row.object_key),
            original_name: row.original_name,
            mime_type: row.mime_type,
            size: row.size.map(|s| to_u64("size", s)).transpose()?,
            status,
            last_job_id: row.last_job_id.map(JobId::from_uuid),
            processed_lines: row
                .processed_lines
                .map(|n| to_u64("processed_lines", n))
                .transpose()?,
            processing_error: row.processing_error,
            processing_started_at: row.processing_started_at,
            processing_finished_at: row.processing_finished_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct LineRow {
    file_id: Uuid,
    line_number: i64,
    raw_text: String,
    state: String,
    payload: Option<serde_json::Value>,
    error: Option<String>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for LineRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LineRow {
            file_id: row.try_get("file_id")?,
            line_number: row.try_get("line_number")?,
            raw_text: row.try_get("raw_text")?,
            state: row.try_get("state")?,
            payload: row.try_get("payload")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<LineRecord> for LineRow {
    type Error = MetadataStoreError;

    fn try_from(record: LineRecord) -> Result<Self, Self::Error> {
        let state = record.state().as_str().to_string();
        let (payload, error) = match record.outcome {
            LineOutcome::Parsed { payload } => (Some(payload), None),
            LineOutcome::Errored { error } => (None, Some(error)),
        };
        Ok(LineRow {
            file_id: record.file_id.into(),
            line_number: to_i64("line_number", record.line_number)?,
            raw_text: record.raw_text,
            state,
            payload,
            error,
            created_at: record.created_at,
        })
    }
}

impl TryFrom<LineRow> for LineRecord {
    type Error = MetadataStoreError;

    fn try_from(row: LineRow) -> Result<Self, Self::Error> {
        let outcome = match (row.state.as_str(), row.payload, row.error) {
            ("parsed", Some(payload), _) => LineOutcome::Parsed { payload },
            ("errored", _, Some(error)) => LineOutcome::Errored { error },
            (state, _, _) => {
                return Err(MetadataStoreError::Corrupt(format!(
                    "line {} has inconsistent state {state}",
                    row.line_number
                )));
            }
        };

        Ok(LineRecord {
            file_id: FileId::from_uuid(row.file_id),
            line_number: to_u64("line_number", row.line_number)?,
            raw_text: row.raw_text,
            outcome,
            created_at: row.created_at,
        })
    }
}
