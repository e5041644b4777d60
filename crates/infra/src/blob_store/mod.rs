//! Blob store boundary: byte streams by locator.
//!
//! The ingestion pipeline only ever *reads* objects, sequentially, in chunks.
//! A stream ends with `None` on end-of-data; an `Err` item is an I/O failure
//! and ends the stream for the consumer.

pub mod in_memory;
pub mod local;

pub use in_memory::InMemoryBlobStore;
pub use local::LocalBlobStore;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

use filepipe_core::BlobLocator;

/// Chunked object contents.
pub type ByteStream = BoxStream<'static, Result<Bytes, BlobStoreError>>;

/// Blob store operation error.
#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("object not found: {0}")]
    NotFound(BlobLocator),
    #[error("invalid locator: {0}")]
    InvalidLocator(String),
    #[error("blob i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read access to stored objects.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Open a stream over the object's bytes.
    async fn get(&self, locator: &BlobLocator) -> Result<ByteStream, BlobStoreError>;
}
