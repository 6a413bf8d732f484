/// Errors from document and blob store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The requested document or object does not exist.
    #[error("not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// The store's access rules rejected the request.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A version precondition did not hold.
    #[error("version conflict on {id}: expected {expected}, found {actual}")]
    Conflict { id: String, expected: u64, actual: u64 },

    /// An ordered query needs an index that is not ready.
    #[error("index on {collection}.{field} is not available")]
    IndexUnavailable { collection: String, field: String },

    /// The backend is unreachable or dropped the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A resumable transfer was interrupted; the committed offset survives.
    #[error("upload {session} interrupted at offset {committed}")]
    Interrupted { session: String, committed: u64 },

    /// The upload session is unknown or already finished.
    #[error("unknown upload session: {0}")]
    UnknownSession(String),

    /// A chunk was sent for an offset other than the committed one.
    #[error("chunk offset {actual} does not match committed offset {expected}")]
    InvalidOffset { expected: u64, actual: u64 },

    /// The transferred byte count disagrees with the declared length.
    #[error("size mismatch: declared {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Object path is malformed.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Returns `true` for conditions a resumable protocol may recover from.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Interrupted { .. } | Self::Unavailable(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StoreError::Interrupted { session: "s".into(), committed: 4 }.is_transient());
        assert!(StoreError::Unavailable("down".into()).is_transient());
        assert!(!StoreError::PermissionDenied("no".into()).is_transient());
        assert!(!StoreError::NotFound { collection: "reports".into(), id: "x".into() }.is_transient());
    }

    #[test]
    fn display_messages() {
        let err = StoreError::Conflict { id: "2024-0001".into(), expected: 3, actual: 4 };
        assert_eq!(err.to_string(), "version conflict on 2024-0001: expected 3, found 4");
    }
}
