use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Json;
use bytes::Bytes;
use denuncia_sdk::{attachment_path, Note, ProtocolId, Report, ReportAccess};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::{ServerError, ServerResult};

#[derive(Clone, Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Health check handler.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

fn protocol(raw: &str) -> ServerResult<ProtocolId> {
    Ok(raw.parse()?)
}

pub async fn put_report(
    State(access): State<ReportAccess>,
    Path(raw): Path<String>,
    Json(data): Json<Map<String, Value>>,
) -> ServerResult<Json<Report>> {
    let id = protocol(&raw)?;
    Ok(Json(access.create_or_replace_report(&id, data).await?))
}

pub async fn get_report(
    State(access): State<ReportAccess>,
    Path(raw): Path<String>,
) -> ServerResult<Json<Report>> {
    let id = protocol(&raw)?;
    access
        .get_report_by_protocol(&id)
        .await?
        .map(Json)
        .ok_or(ServerError::ReportNotFound(raw))
}

pub async fn patch_report(
    State(access): State<ReportAccess>,
    Path(raw): Path<String>,
    Json(patch): Json<Map<String, Value>>,
) -> ServerResult<Json<Report>> {
    let id = protocol(&raw)?;
    Ok(Json(access.update_report(&id, patch).await?))
}

/// Appends the request body, any JSON value, as one admin note.
pub async fn post_note(
    State(access): State<ReportAccess>,
    Path(raw): Path<String>,
    Json(note): Json<Value>,
) -> ServerResult<(StatusCode, Json<Report>)> {
    let id = protocol(&raw)?;
    let report = access.add_admin_note(&id, Note::from(note)).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

pub async fn put_attachment(
    State(access): State<ReportAccess>,
    Path((raw, filename)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<(StatusCode, Json<Value>)> {
    let id = protocol(&raw)?;
    let path = attachment_path(&id, &filename)?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let url = access
        .upload_attachment_with_type(&path, body, content_type)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "url": url, "path": path }))))
}
