//! In-memory blob store for tests/dev.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;

use filepipe_core::BlobLocator;

use super::{BlobStore, BlobStoreError, ByteStream};

#[derive(Debug, Clone)]
struct StoredObject {
    chunks: Vec<Bytes>,
    /// Injected failure raised after all chunks were yielded.
    failure: Option<String>,
}

/// In-memory object store.
///
/// Objects are kept as explicit chunk lists so tests control exactly where
/// chunk boundaries fall, and can inject an I/O failure mid-stream.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    objects: RwLock<HashMap<BlobLocator, StoredObject>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` as a single chunk.
    pub fn put(&self, locator: BlobLocator, data: impl Into<Bytes>) {
        self.put_chunks(locator, vec![data.into()]);
    }

    /// Store an object that streams as exactly these chunks.
    pub fn put_chunks(&self, locator: BlobLocator, chunks: Vec<Bytes>) {
        self.insert(locator, StoredObject { chunks, failure: None });
    }

    /// Store an object whose stream yields `chunks` and then fails with `error`.
    pub fn put_failing(&self, locator: BlobLocator, chunks: Vec<Bytes>, error: impl Into<String>) {
        self.insert(
            locator,
            StoredObject {
                chunks,
                failure: Some(error.into()),
            },
        );
    }

    fn insert(&self, locator: BlobLocator, object: StoredObject) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(locator, object);
        }
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get(&self, locator: &BlobLocator) -> Result<ByteStream, BlobStoreError> {
        let object = {
            let objects = self.objects.read().map_err(|_| {
                BlobStoreError::Io(std::io::Error::other("blob store lock poisoned"))
            })?;
            objects
                .get(locator)
                .cloned()
                .ok_or_else(|| BlobStoreError::NotFound(locator.clone()))?
        };

        let chunks = stream::iter(object.chunks.into_iter().map(Ok));
        let tail = stream::iter(
            object
                .failure
                .map(|msg| Err(BlobStoreError::Io(std::io::Error::other(msg)))),
        );
        Ok(chunks.chain(tail).boxed())
    }
}
