//! Report access layer for Denuncia.
//!
//! Mediates between the intake surfaces and the remote stores: idempotent
//! report creation, live subscriptions with an ordering fallback, partial
//! updates, append-only admin notes and resumable attachment upload.
//!
//! Backends are passed in explicitly through a [`Client`]; nothing here keeps
//! process-wide state.

pub mod client;
pub mod config;
pub mod error;
pub mod reports;
pub mod subscription;
pub mod upload;

pub use client::{Client, InMemoryBackends};
pub use config::{
    BackendConfig, ConfigError, ConfigFile, ConfigSource, NoteAppendMode, SdkConfig, Settings,
};
pub use error::{SdkError, SdkResult};
pub use reports::ReportAccess;
pub use subscription::{SubscriptionHandle, SubscriptionMode};
pub use upload::attachment_path;

// Re-export key types
pub use denuncia_auth::Identity;
pub use denuncia_types::{Note, ProtocolId, Report, ServerTimestamp};
