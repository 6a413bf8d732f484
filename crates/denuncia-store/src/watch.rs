use std::sync::RwLock;

use tokio::sync::mpsc;
use tracing::debug;

use crate::document::{Document, Query, SnapshotStream};
use crate::error::StoreError;

/// A registered query paired with its delivery channel.
struct Watcher {
    query: Query,
    sender: mpsc::UnboundedSender<Result<Vec<Document>, StoreError>>,
}

/// Fan-out router that delivers query snapshots to live watchers.
pub(crate) struct SnapshotRouter {
    watchers: RwLock<Vec<Watcher>>,
}

impl SnapshotRouter {
    pub(crate) fn new() -> Self {
        Self {
            watchers: RwLock::new(Vec::new()),
        }
    }

    /// Register a watcher and deliver its initial snapshot.
    ///
    /// `current` holds every document of the query's collection.
    pub(crate) fn register(&self, query: Query, mut current: Vec<Document>) -> SnapshotStream {
        let (tx, rx) = mpsc::unbounded_channel();
        query.sort(&mut current);
        // The receiver is still in hand, so this send cannot fail.
        let _ = tx.send(Ok(current));
        self.watchers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Watcher { query, sender: tx });
        SnapshotStream::new(rx)
    }

    /// Deliver a fresh snapshot of `collection` to every watcher on it.
    /// Watchers whose streams were dropped are pruned.
    pub(crate) fn publish(&self, collection: &str, docs: &[Document]) {
        let mut watchers = self.watchers.write().unwrap_or_else(|e| e.into_inner());
        watchers.retain(|watcher| {
            if watcher.query.collection != collection {
                return !watcher.sender.is_closed();
            }
            let mut snapshot = docs.to_vec();
            watcher.query.sort(&mut snapshot);
            watcher.sender.send(Ok(snapshot)).is_ok()
        });
        debug!(collection, watchers = watchers.len(), "snapshot published");
    }

    /// Terminate every watcher with `error`.
    pub(crate) fn fail_all(&self, error: StoreError) {
        let mut watchers = self.watchers.write().unwrap_or_else(|e| e.into_inner());
        for watcher in watchers.drain(..) {
            let _ = watcher.sender.send(Err(error.clone()));
        }
    }

    /// Number of live watchers.
    pub(crate) fn watcher_count(&self) -> usize {
        let mut watchers = self.watchers.write().unwrap_or_else(|e| e.into_inner());
        watchers.retain(|w| !w.sender.is_closed());
        watchers.len()
    }
}
