//! Storage contracts for Denuncia.
//!
//! Reports live in a document store and attachments in a blob store. Both are
//! remote, managed services in production; this crate defines the contracts
//! the report access layer relies on and ships in-memory backends that honour
//! them for tests and embedding.
//!
//! # Document Store
//!
//! All backends implement the [`DocumentStore`] trait:
//!
//! - [`InMemoryDocumentStore`] -- `HashMap`-based store with a hybrid logical
//!   server clock, per-document versions and live snapshot delivery
//!
//! # Blob Store
//!
//! All backends implement the [`BlobStore`] trait, a resumable upload
//! protocol (begin, put chunks at offsets, query the committed offset,
//! finish) plus download URL resolution:
//!
//! - [`InMemoryBlobStore`] -- path-addressed objects held in memory
//!
//! # Design Rules
//!
//! 1. Timestamps are assigned by the store, never by the caller.
//! 2. Every write bumps the document version; versions back optimistic
//!    concurrency preconditions.
//! 3. Ordered queries require a ready index; the capability is probeable.
//! 4. Subscribers receive a full snapshot on subscribe and after every change.
//! 5. All errors are propagated, never silently ignored.

pub mod blob;
pub mod blob_memory;
pub mod clock;
pub mod document;
pub mod error;
pub mod memory;
mod watch;

pub use blob::{validate_path, BlobMetadata, BlobStore, UploadSession};
pub use blob_memory::InMemoryBlobStore;
pub use clock::ServerClock;
pub use document::{
    Direction, Document, DocumentStore, FieldTransform, OrderBy, Precondition, Query,
    SnapshotStream,
};
pub use error::{StoreError, StoreResult};
pub use memory::{AccessRules, InMemoryDocumentStore};
