use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

use crate::blob::{validate_path, BlobMetadata, BlobStore, UploadSession};
use crate::clock::ServerClock;
use crate::error::{StoreError, StoreResult};

const URL_SCHEME: &str = "memory://";

struct PendingUpload {
    path: String,
    total_len: u64,
    content_type: Option<String>,
    buffer: Vec<u8>,
}

struct StoredBlob {
    data: Bytes,
    metadata: BlobMetadata,
    token: String,
}

/// In-memory blob store with a resumable upload protocol.
///
/// Objects are addressed by path within a single bucket. Download URLs take
/// the form `memory://{bucket}/o/{escaped path}?token={token}`; re-uploading a
/// path rotates its token, invalidating earlier URLs.
///
/// [`interrupt_next_chunks`](Self::interrupt_next_chunks) simulates transient
/// transport failures: an interrupted chunk commits only its first half.
pub struct InMemoryBlobStore {
    bucket: String,
    sessions: Mutex<HashMap<String, PendingUpload>>,
    objects: RwLock<HashMap<String, StoredBlob>>,
    clock: ServerClock,
    pending_interruptions: AtomicUsize,
    allow_write: AtomicBool,
}

impl InMemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            sessions: Mutex::new(HashMap::new()),
            objects: RwLock::new(HashMap::new()),
            clock: ServerClock::new(),
            pending_interruptions: AtomicUsize::new(0),
            allow_write: AtomicBool::new(true),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Interrupt the next `count` chunk transfers.
    pub fn interrupt_next_chunks(&self, count: usize) {
        self.pending_interruptions.store(count, Ordering::SeqCst);
    }

    /// Allow or reject new uploads.
    pub fn set_writable(&self, writable: bool) {
        self.allow_write.store(writable, Ordering::SeqCst);
    }

    /// Number of finished objects.
    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of sessions not yet finished.
    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn take_interruption(&self) -> bool {
        self.pending_interruptions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn url_for(&self, path: &str, token: &str) -> String {
        format!(
            "{URL_SCHEME}{}/o/{}?token={token}",
            self.bucket,
            escape_path(path)
        )
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new("local-bucket")
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn begin_upload(
        &self,
        path: &str,
        total_len: u64,
        content_type: Option<&str>,
    ) -> StoreResult<UploadSession> {
        validate_path(path)?;
        if !self.allow_write.load(Ordering::SeqCst) {
            return Err(StoreError::PermissionDenied(format!("upload to {path}")));
        }
        let id = Uuid::now_v7().simple().to_string();
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                id.clone(),
                PendingUpload {
                    path: path.to_string(),
                    total_len,
                    content_type: content_type.map(str::to_string),
                    buffer: Vec::new(),
                },
            );
        debug!(session = %id, path, total_len, "upload session opened");
        Ok(UploadSession {
            id,
            path: path.to_string(),
            total_len,
        })
    }

    async fn put_chunk(
        &self,
        session: &UploadSession,
        offset: u64,
        chunk: Bytes,
    ) -> StoreResult<u64> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let pending = sessions
            .get_mut(&session.id)
            .ok_or_else(|| StoreError::UnknownSession(session.id.clone()))?;

        let committed = pending.buffer.len() as u64;
        if offset != committed {
            return Err(StoreError::InvalidOffset {
                expected: committed,
                actual: offset,
            });
        }
        let end = committed + chunk.len() as u64;
        if end > pending.total_len {
            return Err(StoreError::SizeMismatch {
                expected: pending.total_len,
                actual: end,
            });
        }

        if self.take_interruption() {
            let partial = chunk.len() / 2;
            pending.buffer.extend_from_slice(&chunk[..partial]);
            return Err(StoreError::Interrupted {
                session: session.id.clone(),
                committed: pending.buffer.len() as u64,
            });
        }

        pending.buffer.extend_from_slice(&chunk);
        Ok(pending.buffer.len() as u64)
    }

    async fn committed_offset(&self, session: &UploadSession) -> StoreResult<u64> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(&session.id)
            .map(|p| p.buffer.len() as u64)
            .ok_or_else(|| StoreError::UnknownSession(session.id.clone()))
    }

    async fn finish(&self, session: &UploadSession) -> StoreResult<BlobMetadata> {
        let pending = {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            let pending = sessions
                .remove(&session.id)
                .ok_or_else(|| StoreError::UnknownSession(session.id.clone()))?;
            if pending.buffer.len() as u64 != pending.total_len {
                let actual = pending.buffer.len() as u64;
                let expected = pending.total_len;
                sessions.insert(session.id.clone(), pending);
                return Err(StoreError::SizeMismatch { expected, actual });
            }
            pending
        };

        let data = Bytes::from(pending.buffer);
        let metadata = BlobMetadata {
            path: pending.path.clone(),
            size: data.len() as u64,
            checksum: blake3::hash(&data).to_hex().to_string(),
            content_type: pending.content_type,
            uploaded_at: self.clock.now(),
        };
        let token = Uuid::now_v7().simple().to_string();
        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                pending.path,
                StoredBlob {
                    data,
                    metadata: metadata.clone(),
                    token,
                },
            );
        debug!(path = %metadata.path, size = metadata.size, "upload finished");
        Ok(metadata)
    }

    async fn abort(&self, session: &UploadSession) -> StoreResult<()> {
        let removed = self
            .sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&session.id);
        if let Some(pending) = removed {
            debug!(path = %pending.path, committed = pending.buffer.len(), "upload aborted");
        }
        Ok(())
    }

    async fn download_url(&self, path: &str) -> StoreResult<String> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        let blob = objects.get(path).ok_or_else(|| StoreError::NotFound {
            collection: self.bucket.clone(),
            id: path.to_string(),
        })?;
        Ok(self.url_for(&blob.metadata.path, &blob.token))
    }

    async fn fetch(&self, url: &str) -> StoreResult<Bytes> {
        let invalid = |reason: &str| StoreError::InvalidPath {
            path: url.to_string(),
            reason: reason.to_string(),
        };
        let prefix = format!("{URL_SCHEME}{}/o/", self.bucket);
        let rest = url
            .strip_prefix(&prefix)
            .ok_or_else(|| invalid("foreign bucket or scheme"))?;
        let (escaped, token) = rest
            .split_once("?token=")
            .ok_or_else(|| invalid("missing token"))?;
        let path = unescape_path(escaped).ok_or_else(|| invalid("bad escape"))?;

        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        match objects.get(&path) {
            Some(blob) if blob.token == token => Ok(blob.data.clone()),
            Some(_) => Err(StoreError::PermissionDenied(format!("stale token for {path}"))),
            None => Err(StoreError::NotFound {
                collection: self.bucket.clone(),
                id: path,
            }),
        }
    }
}

impl std::fmt::Debug for InMemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBlobStore")
            .field("bucket", &self.bucket)
            .field("object_count", &self.len())
            .field("open_sessions", &self.open_sessions())
            .finish()
    }
}

fn escape_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn unescape_path(escaped: &str) -> Option<String> {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = escaped.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn upload(store: &InMemoryBlobStore, path: &str, data: &[u8]) -> BlobMetadata {
        let session = store
            .begin_upload(path, data.len() as u64, Some("text/plain"))
            .await
            .unwrap();
        let committed = store
            .put_chunk(&session, 0, Bytes::copy_from_slice(data))
            .await
            .unwrap();
        assert_eq!(committed, data.len() as u64);
        store.finish(&session).await.unwrap()
    }

    #[test]
    fn path_escaping_roundtrips() {
        let path = "reports/2024-0001/relatório final.pdf";
        let escaped = escape_path(path);
        assert!(!escaped.contains('/'));
        assert_eq!(unescape_path(&escaped).unwrap(), path);
        assert!(unescape_path("%G1").is_none());
    }

    #[tokio::test]
    async fn upload_then_fetch_by_url() {
        let store = InMemoryBlobStore::new("bucket");
        let meta = upload(&store, "reports/1/a.txt", b"hello").await;
        assert_eq!(meta.size, 5);
        assert_eq!(meta.checksum, blake3::hash(b"hello").to_hex().to_string());
        assert_eq!(meta.content_type.as_deref(), Some("text/plain"));

        let url = store.download_url("reports/1/a.txt").await.unwrap();
        assert!(url.starts_with("memory://bucket/o/reports%2F1%2Fa.txt?token="));
        assert_eq!(store.fetch(&url).await.unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn chunks_must_follow_committed_offset() {
        let store = InMemoryBlobStore::default();
        let session = store.begin_upload("a/b", 4, None).await.unwrap();
        store.put_chunk(&session, 0, Bytes::from_static(b"ab")).await.unwrap();
        let err = store
            .put_chunk(&session, 0, Bytes::from_static(b"cd"))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::InvalidOffset { expected: 2, actual: 0 });
    }

    #[tokio::test]
    async fn oversized_chunk_is_rejected() {
        let store = InMemoryBlobStore::default();
        let session = store.begin_upload("a/b", 2, None).await.unwrap();
        let err = store
            .put_chunk(&session, 0, Bytes::from_static(b"abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SizeMismatch { .. }));
    }

    #[tokio::test]
    async fn interrupted_chunk_commits_prefix() {
        let store = InMemoryBlobStore::default();
        store.interrupt_next_chunks(1);
        let session = store.begin_upload("a/b", 4, None).await.unwrap();
        let err = store
            .put_chunk(&session, 0, Bytes::from_static(b"abcd"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.committed_offset(&session).await.unwrap(), 2);

        store.put_chunk(&session, 2, Bytes::from_static(b"cd")).await.unwrap();
        store.finish(&session).await.unwrap();
        let url = store.download_url("a/b").await.unwrap();
        assert_eq!(store.fetch(&url).await.unwrap(), Bytes::from_static(b"abcd"));
    }

    #[tokio::test]
    async fn finish_requires_all_bytes() {
        let store = InMemoryBlobStore::default();
        let session = store.begin_upload("a/b", 4, None).await.unwrap();
        store.put_chunk(&session, 0, Bytes::from_static(b"ab")).await.unwrap();
        assert!(matches!(
            store.finish(&session).await.unwrap_err(),
            StoreError::SizeMismatch { expected: 4, actual: 2 }
        ));
        // Session survives and can still be completed.
        store.put_chunk(&session, 2, Bytes::from_static(b"cd")).await.unwrap();
        assert!(store.finish(&session).await.is_ok());
        assert!(store.finish(&session).await.is_err());
    }

    #[tokio::test]
    async fn abort_discards_session() {
        let store = InMemoryBlobStore::default();
        let session = store.begin_upload("a/b", 4, None).await.unwrap();
        store.put_chunk(&session, 0, Bytes::from_static(b"ab")).await.unwrap();
        store.abort(&session).await.unwrap();
        assert_eq!(store.open_sessions(), 0);
        assert!(store.is_empty());
        assert!(matches!(
            store.committed_offset(&session).await.unwrap_err(),
            StoreError::UnknownSession(_)
        ));
        // Aborting twice is harmless.
        store.abort(&session).await.unwrap();
    }

    #[tokio::test]
    async fn reupload_rotates_token() {
        let store = InMemoryBlobStore::default();
        upload(&store, "a/b", b"one").await;
        let old = store.download_url("a/b").await.unwrap();
        upload(&store, "a/b", b"two").await;
        let new = store.download_url("a/b").await.unwrap();
        assert_ne!(old, new);
        assert!(matches!(store.fetch(&old).await, Err(StoreError::PermissionDenied(_))));
        assert_eq!(store.fetch(&new).await.unwrap(), Bytes::from_static(b"two"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn read_only_store_rejects_uploads() {
        let store = InMemoryBlobStore::default();
        store.set_writable(false);
        assert!(matches!(
            store.begin_upload("a/b", 1, None).await,
            Err(StoreError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn fetch_rejects_foreign_urls() {
        let store = InMemoryBlobStore::new("mine");
        assert!(store.fetch("memory://other/o/a?token=x").await.is_err());
        assert!(store.fetch("https://example.com/a").await.is_err());
        assert!(matches!(
            store.fetch("memory://mine/o/missing?token=x").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn invalid_paths_are_rejected() {
        let store = InMemoryBlobStore::default();
        assert!(store.begin_upload("../etc/passwd", 1, None).await.is_err());
    }
}
