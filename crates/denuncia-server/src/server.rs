use denuncia_sdk::ReportAccess;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::router::build_router;

/// Report intake server.
pub struct DenunciaServer {
    config: ServerConfig,
    access: ReportAccess,
}

impl DenunciaServer {
    pub fn new(config: ServerConfig, access: ReportAccess) -> Self {
        Self { config, access }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.access.clone(), &self.config)
    }

    /// Start serving requests.
    pub async fn serve(self) -> ServerResult<()> {
        let app = self.router();
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        tracing::info!("denuncia server listening on {}", self.config.bind_addr);
        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}
