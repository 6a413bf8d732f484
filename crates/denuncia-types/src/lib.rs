//! Foundation types for Denuncia.
//!
//! This crate provides the entity and identifier types shared by every other
//! Denuncia crate: the store backends, the identity layer, the report access
//! SDK and the HTTP intake service.
//!
//! # Key Types
//!
//! - [`ProtocolId`] — Human-facing complaint code, doubles as the report key
//! - [`ServerTimestamp`] — Store-assigned hybrid logical timestamp
//! - [`Report`] — The complaint entity with write-once `createdAt` and
//!   append-only `notes`
//! - [`Note`] — Opaque administrative note value

pub mod error;
pub mod protocol;
pub mod report;
pub mod timestamp;

pub use error::{TypeError, TypeResult};
pub use protocol::ProtocolId;
pub use report::{field, Note, Report};
pub use timestamp::ServerTimestamp;
