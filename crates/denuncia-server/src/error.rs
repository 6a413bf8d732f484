use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use denuncia_sdk::SdkError;
use denuncia_store::StoreError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid protocol: {0}")]
    InvalidProtocol(#[from] denuncia_types::TypeError),

    #[error("report not found: {0}")]
    ReportNotFound(String),

    #[error(transparent)]
    Sdk(#[from] SdkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidProtocol(_) => StatusCode::BAD_REQUEST,
            Self::ReportNotFound(_) => StatusCode::NOT_FOUND,
            Self::Sdk(e) => sdk_status(e),
            Self::Io(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn sdk_status(e: &SdkError) -> StatusCode {
    if e.is_not_found() {
        return StatusCode::NOT_FOUND;
    }
    if e.is_permission_denied() {
        return StatusCode::FORBIDDEN;
    }
    match e {
        SdkError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        SdkError::Conflict { .. } => StatusCode::CONFLICT,
        SdkError::Auth(_) => StatusCode::UNAUTHORIZED,
        SdkError::Read(s) | SdkError::Write(s) | SdkError::Upload(s) => store_status(s),
        SdkError::Decode { .. } | SdkError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn store_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::Unavailable(_) | StoreError::Interrupted { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        StoreError::InvalidPath { .. } | StoreError::SizeMismatch { .. } => StatusCode::BAD_REQUEST,
        StoreError::Conflict { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_sdk_errors_to_status() {
        let cases = [
            (SdkError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (
                SdkError::Conflict {
                    id: "r".into(),
                    expected: 1,
                    actual: 2,
                },
                StatusCode::CONFLICT,
            ),
            (
                SdkError::Write(StoreError::NotFound {
                    collection: "reports".into(),
                    id: "r".into(),
                }),
                StatusCode::NOT_FOUND,
            ),
            (
                SdkError::Read(StoreError::PermissionDenied("read".into())),
                StatusCode::FORBIDDEN,
            ),
            (
                SdkError::Write(StoreError::Unavailable("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ServerError::from(err).status(), status);
        }
    }

    #[test]
    fn not_found_report() {
        assert_eq!(
            ServerError::ReportNotFound("r".into()).status(),
            StatusCode::NOT_FOUND
        );
    }
}
