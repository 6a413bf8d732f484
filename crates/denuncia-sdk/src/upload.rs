//! Resumable attachment upload.

use bytes::Bytes;
use denuncia_store::{validate_path, BlobMetadata, BlobStore, StoreResult, UploadSession};
use denuncia_types::ProtocolId;
use tracing::{debug, warn};

use crate::error::{SdkError, SdkResult};

/// Storage path of an attachment: `reports/{protocol}/{filename}`.
pub fn attachment_path(protocol: &ProtocolId, filename: &str) -> SdkResult<String> {
    if filename.is_empty() || filename == "." || filename == ".." || filename.contains('/') {
        return Err(SdkError::InvalidInput(format!(
            "attachment filename {filename:?} must be a single path segment"
        )));
    }
    let path = format!("reports/{protocol}/{filename}");
    validate_path(&path).map_err(|e| SdkError::InvalidInput(e.to_string()))?;
    Ok(path)
}

/// Drives one resumable transfer to completion.
///
/// Chunks are sent at the store's committed offset. A transient interruption
/// makes the driver ask the store for the committed offset and continue from
/// there, up to `max_resume_attempts` times over the whole transfer.
pub(crate) struct ResumableUpload<'a> {
    pub(crate) store: &'a dyn BlobStore,
    pub(crate) chunk_size: usize,
    pub(crate) max_resume_attempts: u32,
}

impl ResumableUpload<'_> {
    /// Upload `data` to `path` and return the finished object's metadata.
    pub(crate) async fn run(
        &self,
        path: &str,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StoreResult<BlobMetadata> {
        validate_path(path)?;
        let total = data.len() as u64;
        let session = self.store.begin_upload(path, total, content_type).await?;

        match self.transfer(&session, &data).await {
            Ok(metadata) => Ok(metadata),
            Err(e) => {
                if let Err(abort_err) = self.store.abort(&session).await {
                    warn!(session = %session.id, error = %abort_err, "failed to abort upload session");
                }
                Err(e)
            }
        }
    }

    async fn transfer(&self, session: &UploadSession, data: &Bytes) -> StoreResult<BlobMetadata> {
        let total = data.len() as u64;
        let mut offset: u64 = 0;
        let mut resumes: u32 = 0;
        while offset < total {
            let start = offset as usize;
            let end = (start + self.chunk_size).min(data.len());
            match self.store.put_chunk(session, offset, data.slice(start..end)).await {
                Ok(committed) => {
                    debug!(session = %session.id, committed, total, "chunk committed");
                    offset = committed;
                }
                Err(e) if e.is_transient() && resumes < self.max_resume_attempts => {
                    resumes += 1;
                    offset = self.store.committed_offset(session).await?;
                    warn!(session = %session.id, offset, attempt = resumes, error = %e, "resuming interrupted upload");
                }
                Err(e) => return Err(e),
            }
        }

        self.store.finish(session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use denuncia_store::{InMemoryBlobStore, StoreError};

    fn driver(store: &InMemoryBlobStore, chunk_size: usize, max_resume_attempts: u32) -> ResumableUpload<'_> {
        ResumableUpload {
            store,
            chunk_size,
            max_resume_attempts,
        }
    }

    fn payload(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
    }

    #[test]
    fn builds_attachment_paths() {
        let protocol = ProtocolId::sequential(2024, 1);
        assert_eq!(
            attachment_path(&protocol, "evidence.pdf").unwrap(),
            "reports/2024-0001/evidence.pdf"
        );
        for bad in ["", "..", "a/b"] {
            assert!(attachment_path(&protocol, bad).is_err());
        }
    }

    #[tokio::test]
    async fn uploads_in_chunks() {
        let store = InMemoryBlobStore::default();
        let data = payload(10_000);
        let meta = driver(&store, 1024, 0).run("a/b.bin", data.clone(), None).await.unwrap();
        assert_eq!(meta.size, 10_000);
        let url = store.download_url("a/b.bin").await.unwrap();
        assert_eq!(store.fetch(&url).await.unwrap(), data);
    }

    #[tokio::test]
    async fn empty_file_uploads() {
        let store = InMemoryBlobStore::default();
        let meta = driver(&store, 1024, 0).run("a/empty", Bytes::new(), None).await.unwrap();
        assert_eq!(meta.size, 0);
    }

    #[tokio::test]
    async fn resumes_from_committed_offset() {
        let store = InMemoryBlobStore::default();
        store.interrupt_next_chunks(2);
        let data = payload(5000);
        driver(&store, 2048, 2).run("a/b", data.clone(), None).await.unwrap();
        let url = store.download_url("a/b").await.unwrap();
        assert_eq!(store.fetch(&url).await.unwrap(), data);
    }

    #[tokio::test]
    async fn gives_up_after_resume_budget() {
        let store = InMemoryBlobStore::default();
        store.interrupt_next_chunks(3);
        let err = driver(&store, 1024, 2).run("a/b", payload(4096), None).await.unwrap_err();
        assert!(matches!(err, StoreError::Interrupted { .. }));
        assert!(store.is_empty());
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn failed_upload_releases_session() {
        let store = InMemoryBlobStore::default();
        store.interrupt_next_chunks(5);
        assert!(driver(&store, 512, 1).run("a/b", payload(2048), None).await.is_err());
        assert_eq!(store.open_sessions(), 0);

        // A later upload to the same path starts clean.
        let data = payload(2048);
        driver(&store, 512, 0).run("a/b", data.clone(), None).await.unwrap();
        let url = store.download_url("a/b").await.unwrap();
        assert_eq!(store.fetch(&url).await.unwrap(), data);
    }

    #[tokio::test]
    async fn interruption_without_budget_releases_session() {
        let store = InMemoryBlobStore::default();
        store.interrupt_next_chunks(1);
        let err = driver(&store, 512, 0).run("a/b", payload(1024), None).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn rejects_invalid_path_before_transfer() {
        let store = InMemoryBlobStore::default();
        let err = driver(&store, 1024, 0).run("/abs", payload(1), None).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath { .. }));
        assert_eq!(store.open_sessions(), 0);
    }
}
