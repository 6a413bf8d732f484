use std::sync::Arc;

use denuncia_auth::{IdentityProvider, LocalIdentityProvider, SessionManager};
use denuncia_store::{BlobStore, DocumentStore, InMemoryBlobStore, InMemoryDocumentStore};

use crate::config::Settings;

/// Explicitly constructed connection to the backends.
///
/// Holds the document store, the blob store, the session manager and the
/// validated settings. Build one per process (or per test) and hand it to
/// [`ReportAccess`](crate::ReportAccess).
pub struct Client {
    pub(crate) documents: Arc<dyn DocumentStore>,
    pub(crate) blobs: Arc<dyn BlobStore>,
    pub(crate) sessions: SessionManager,
    pub(crate) settings: Settings,
}

impl Client {
    pub fn new(
        settings: Settings,
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            documents,
            blobs,
            sessions: SessionManager::new(identity),
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("project", &self.settings.backend.project_id)
            .field("collection", &self.settings.sdk.collection)
            .finish_non_exhaustive()
    }
}

/// In-memory backends with their concrete types kept, so callers can drive
/// the stores directly (fault injection, index state, inspection).
#[derive(Clone, Debug)]
pub struct InMemoryBackends {
    pub documents: Arc<InMemoryDocumentStore>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub identity: Arc<LocalIdentityProvider>,
}

impl InMemoryBackends {
    /// Fresh backends; the blob bucket is named after the configured one.
    pub fn new(settings: &Settings) -> Self {
        Self {
            documents: Arc::new(InMemoryDocumentStore::new()),
            blobs: Arc::new(InMemoryBlobStore::new(settings.backend.storage_bucket.clone())),
            identity: Arc::new(LocalIdentityProvider::new()),
        }
    }

    /// A client wired to these backends.
    pub fn client(&self, settings: Settings) -> Client {
        Client::new(
            settings,
            self.documents.clone(),
            self.blobs.clone(),
            self.identity.clone(),
        )
    }
}
