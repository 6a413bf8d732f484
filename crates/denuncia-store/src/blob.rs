//! The [`BlobStore`] trait: path-addressed binary objects with a resumable
//! upload protocol.

use async_trait::async_trait;
use bytes::Bytes;
use denuncia_types::ServerTimestamp;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// An open resumable upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadSession {
    /// Opaque session identifier issued by the store.
    pub id: String,
    /// Destination object path.
    pub path: String,
    /// Declared total length in bytes.
    pub total_len: u64,
}

/// Metadata of a finished object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub path: String,
    pub size: u64,
    /// BLAKE3 hex digest of the content.
    pub checksum: String,
    pub content_type: Option<String>,
    pub uploaded_at: ServerTimestamp,
}

/// Remote blob store.
///
/// Uploads follow a resumable protocol: the store tracks the committed
/// offset of each session, chunks must be sent at exactly that offset, and a
/// transfer interrupted with [`StoreError::Interrupted`] can continue from the
/// committed offset instead of byte zero.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Open an upload session for `path`.
    async fn begin_upload(
        &self,
        path: &str,
        total_len: u64,
        content_type: Option<&str>,
    ) -> StoreResult<UploadSession>;

    /// Send `chunk` at `offset`; returns the new committed offset.
    async fn put_chunk(&self, session: &UploadSession, offset: u64, chunk: Bytes)
        -> StoreResult<u64>;

    /// Ask the store how many bytes of the session are committed.
    async fn committed_offset(&self, session: &UploadSession) -> StoreResult<u64>;

    /// Finalize the session once every byte is committed.
    async fn finish(&self, session: &UploadSession) -> StoreResult<BlobMetadata>;

    /// Discard an unfinished session and its committed bytes. Aborting a
    /// session the store no longer knows is not an error.
    async fn abort(&self, session: &UploadSession) -> StoreResult<()>;

    /// Resolve a download URL for a finished object.
    async fn download_url(&self, path: &str) -> StoreResult<String>;

    /// Dereference a download URL.
    async fn fetch(&self, url: &str) -> StoreResult<Bytes>;
}

/// Validate an object path such as `reports/2024-0001/evidence.pdf`.
///
/// Paths are relative, `/`-separated, with no empty, `.` or `..` segments and
/// no control characters.
pub fn validate_path(path: &str) -> StoreResult<()> {
    let reject = |reason: &str| {
        Err(StoreError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        })
    };
    if path.is_empty() {
        return reject("empty path");
    }
    if path.chars().any(char::is_control) {
        return reject("control characters");
    }
    for segment in path.split('/') {
        match segment {
            "" => return reject("empty segment"),
            "." | ".." => return reject("relative segment"),
            _ => {}
        }
    }
    Ok(())
}
