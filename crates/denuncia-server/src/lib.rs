//! HTTP intake surface for Denuncia.
//!
//! Exposes the report access layer over JSON: submission, review, admin
//! notes and attachment upload.

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::DenunciaServer;
