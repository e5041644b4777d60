//! Infrastructure layer: job dispatcher, ingestion pipeline, stores, config.

pub mod blob_store;
pub mod config;
pub mod jobs;
pub mod metadata_store;
pub mod processing;
pub mod service;


pub use blob_store::{BlobStore, BlobStoreError, ByteStream, InMemoryBlobStore, LocalBlobStore};
pub use config::{ConfigError, IngestConfig};
pub use jobs::{
    Job, JobEvent, JobEventKind, JobHandler, JobQueue, JobQueueConfig, JobState, QueueError,
};
pub use metadata_store::{
    BatchInsertReport, InMemoryMetadataStore, MetadataStore, MetadataStoreError,
    PostgresMetadataStore,
};
pub use processing::{FileProcessor, ProcessingError, ProcessingSummary, ProcessorSettings};
pub use service::{ProcessingService, ServiceError};
