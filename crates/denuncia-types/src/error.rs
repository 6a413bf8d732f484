use thiserror::Error;

/// Errors produced by type construction and decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid protocol code {value:?}: {reason}")]
    InvalidProtocol { value: String, reason: String },

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias for type operations.
pub type TypeResult<T> = Result<T, TypeError>;
