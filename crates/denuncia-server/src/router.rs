use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use denuncia_sdk::ReportAccess;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::handler;

/// Build the axum router with all intake endpoints.
pub fn build_router(access: ReportAccess, config: &ServerConfig) -> Router {
    Router::new()
        .route("/v1/health", get(handler::health_handler))
        .route(
            "/v1/reports/:protocol",
            get(handler::get_report)
                .put(handler::put_report)
                .patch(handler::patch_report),
        )
        .route("/v1/reports/:protocol/notes", post(handler::post_note))
        .route(
            "/v1/reports/:protocol/attachments/:filename",
            put(handler::put_attachment),
        )
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(access)
}
