use denuncia_auth::AuthError;
use denuncia_store::StoreError;
use denuncia_types::TypeError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("read failed: {0}")]
    Read(#[source] StoreError),

    #[error("write failed: {0}")]
    Write(#[source] StoreError),

    #[error("upload failed: {0}")]
    Upload(#[source] StoreError),

    #[error("concurrent update on report {id}: read version {expected}, found {actual}")]
    Conflict { id: String, expected: u64, actual: u64 },

    #[error("stored report {id} is malformed: {source}")]
    Decode {
        id: String,
        #[source]
        source: TypeError,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl SdkError {
    /// Returns `true` if the underlying store reported a missing document.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Read(StoreError::NotFound { .. }) | Self::Write(StoreError::NotFound { .. })
        )
    }

    /// Returns `true` if the store's access rules rejected the request.
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            Self::Read(StoreError::PermissionDenied(_))
                | Self::Write(StoreError::PermissionDenied(_))
                | Self::Upload(StoreError::PermissionDenied(_))
        )
    }
}

pub type SdkResult<T> = Result<T, SdkError>;
