//! Directory-backed blob store.
//!
//! Objects live at `<root>/<bucket>/<key>`. Keys may contain `/` but must not
//! escape the root.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

use filepipe_core::BlobLocator;

use super::{BlobStore, BlobStoreError, ByteStream};

const READ_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for `locator`, rejecting anything that is not a plain
    /// relative path.
    pub fn path_for(&self, locator: &BlobLocator) -> Result<PathBuf, BlobStoreError> {
        let mut path = self.root.clone();
        for part in [locator.bucket.as_str(), locator.key.as_str()] {
            if part.is_empty() {
                return Err(BlobStoreError::InvalidLocator(format!(
                    "empty component in {locator}"
                )));
            }
            for component in Path::new(part).components() {
                match component {
                    Component::Normal(segment) => path.push(segment),
                    _ => {
                        return Err(BlobStoreError::InvalidLocator(format!(
                            "{locator} must be a plain relative path"
                        )));
                    }
                }
            }
        }
        Ok(path)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn get(&self, locator: &BlobLocator) -> Result<ByteStream, BlobStoreError> {
        let path = self.path_for(locator)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobStoreError::NotFound(locator.clone()));
            }
            Err(err) => return Err(BlobStoreError::Io(err)),
        };
        debug!(path = %path.display(), "opened blob");

        Ok(ReaderStream::with_capacity(file, READ_CHUNK_BYTES)
            .map_err(BlobStoreError::Io)
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn locator_cannot_escape_root() {
        let store = LocalBlobStore::new("/srv/blobs");

        for key in ["../etc/passwd", "/abs", "a/../../b", ""] {
            let err = store.path_for(&BlobLocator::new("uploads", key)).unwrap_err();
            assert!(matches!(err, BlobStoreError::InvalidLocator(_)), "{key}");
        }

        let ok = store
            .path_for(&BlobLocator::new("uploads", "2024/a.jsonl"))
            .unwrap();
        assert_eq!(ok, PathBuf::from("/srv/blobs/uploads/2024/a.jsonl"));
    }

    #[tokio::test]
    async fn streams_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("uploads")).unwrap();
        std::fs::write(dir.path().join("uploads/a.jsonl"), b"{\"a\":1}\n").unwrap();

        let store = LocalBlobStore::new(dir.path());
        let chunks: Vec<Bytes> = store
            .get(&BlobLocator::new("uploads", "a.jsonl"))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), b"{\"a\":1}\n".to_vec());
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        let err = store
            .get(&BlobLocator::new("uploads", "missing"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BlobStoreError::NotFound(_)));
    }
}
