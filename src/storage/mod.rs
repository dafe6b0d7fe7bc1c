//! Object-storage capability consumed by the raw loader.
//!
//! The pipeline never lists, writes or deletes; it only opens a byte stream
//! for a file another component discovered. `LocalFileStore` serves the CLI
//! and tests by streaming files off the local filesystem in fixed chunks.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::errors::{EtlError, EtlResult};
use crate::types::DiscoveredFile;

/// Chunked byte stream for one source file
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Vec<u8>>> + Send>>;

/// The only object-storage operation the core needs
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Open a streaming reader for a discovered file
    async fn open_stream(&self, file: &DiscoveredFile) -> EtlResult<ByteStream>;
}

/// Filesystem-backed store: `key` resolves relative to `root`.
pub struct LocalFileStore {
    root: PathBuf,
    chunk_size: usize,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chunk_size: 64 * 1024,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn open_stream(&self, file: &DiscoveredFile) -> EtlResult<ByteStream> {
        let path = self.resolve(&file.key);
        let handle = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EtlError::FileNotFound(path.display().to_string()),
            std::io::ErrorKind::PermissionDenied => {
                EtlError::PermissionDenied(path.display().to_string())
            }
            _ => EtlError::Io(e),
        })?;

        debug!(key = %file.key, "opened local stream");

        let chunk_size = self.chunk_size;
        let stream = futures::stream::unfold(Some(handle), move |state| async move {
            let mut handle = state?;
            let mut buf = vec![0u8; chunk_size];
            match handle.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(buf), Some(handle)))
                }
                Err(e) => Some((Err(e), None)),
            }
        });

        Ok(Box::pin(stream))
    }
}

/// Build a `DiscoveredFile` descriptor for a local file, hashing its content.
///
/// Stands in for the out-of-scope discovery collaborator when loading from
/// disk via the CLI. The version id is derived from the file's modified time
/// so re-exports of the same key are distinguishable.
pub async fn describe_local_file(
    root: &Path,
    key: &str,
    extract_type: &str,
    extracted_date: chrono::NaiveDate,
) -> EtlResult<DiscoveredFile> {
    let path = root.join(key);
    let metadata = tokio::fs::metadata(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EtlError::FileNotFound(path.display().to_string())
        } else {
            EtlError::Io(e)
        }
    })?;

    let content = tokio::fs::read(&path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    let content_hash = hex::encode(hasher.finalize());

    let last_modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    Ok(DiscoveredFile {
        bucket: "local".to_string(),
        key: key.to_string(),
        version_id: last_modified.timestamp().to_string(),
        content_hash,
        extracted_date,
        extract_type: extract_type.to_string(),
        size: metadata.len(),
        last_modified,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use futures::StreamExt;
    use std::io::Write;

    fn file_for(key: &str) -> DiscoveredFile {
        DiscoveredFile {
            bucket: "local".to_string(),
            key: key.to_string(),
            version_id: "1".to_string(),
            content_hash: "unused".to_string(),
            extracted_date: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            extract_type: "patients".to_string(),
            size: 0,
            last_modified: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_local_store_streams_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("data.csv")).unwrap();
        f.write_all(b"0123456789").unwrap();

        let store = LocalFileStore::new(dir.path()).with_chunk_size(4);
        let mut stream = store.open_stream(&file_for("data.csv")).await.unwrap();

        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next().await {
            chunks.push(chunk.unwrap());
        }
        assert_eq!(chunks, vec![b"0123".to_vec(), b"4567".to_vec(), b"89".to_vec()]);
    }

    #[tokio::test]
    async fn test_missing_file_maps_to_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());
        let err = match store.open_stream(&file_for("absent.csv")).await {
            Ok(_) => panic!("expected open_stream to fail for a missing file"),
            Err(e) => e,
        };
        assert!(matches!(err, EtlError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_describe_local_file_hashes_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("p.csv"), b"abc").unwrap();

        let described = describe_local_file(
            dir.path(),
            "p.csv",
            "patients",
            NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(described.size, 3);
        // sha256("abc")
        assert_eq!(
            described.content_hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
