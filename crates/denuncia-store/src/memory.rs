use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use denuncia_types::ServerTimestamp;
use serde_json::{Map, Value};
use tracing::debug;

use crate::clock::ServerClock;
use crate::document::{
    merge_fields, Document, DocumentStore, FieldTransform, Precondition, Query, SnapshotStream,
};
use crate::error::{StoreError, StoreResult};
use crate::watch::SnapshotRouter;

/// Access rules evaluated on every request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessRules {
    pub allow_read: bool,
    pub allow_write: bool,
}

impl AccessRules {
    pub const fn open() -> Self {
        Self {
            allow_read: true,
            allow_write: true,
        }
    }

    pub const fn read_only() -> Self {
        Self {
            allow_read: true,
            allow_write: false,
        }
    }

    pub const fn locked() -> Self {
        Self {
            allow_read: false,
            allow_write: false,
        }
    }
}

impl Default for AccessRules {
    fn default() -> Self {
        Self::open()
    }
}

type Collection = BTreeMap<String, Document>;

/// In-memory, HashMap-based document store.
///
/// Intended for tests and embedding. Collections are held behind a `RwLock`;
/// every write is stamped by a shared [`ServerClock`], bumps the document
/// version and publishes a fresh snapshot to live subscribers before the
/// write lock is released, so watchers observe writes in commit order.
///
/// Ordering indexes are considered ready unless explicitly dropped with
/// [`drop_index`](Self::drop_index).
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
    clock: ServerClock,
    missing_indexes: RwLock<HashSet<(String, String)>>,
    rules: RwLock<AccessRules>,
    router: SnapshotRouter,
}

impl InMemoryDocumentStore {
    /// Create a new empty store with open access rules.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            clock: ServerClock::new(),
            missing_indexes: RwLock::new(HashSet::new()),
            rules: RwLock::new(AccessRules::open()),
            router: SnapshotRouter::new(),
        }
    }

    /// Replace the access rules.
    pub fn set_rules(&self, rules: AccessRules) {
        *self.rules.write().unwrap_or_else(|e| e.into_inner()) = rules;
    }

    /// Mark the ordering index on `collection.field` as not ready.
    pub fn drop_index(&self, collection: &str, field: &str) {
        self.missing_indexes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((collection.to_string(), field.to_string()));
    }

    /// Mark the ordering index on `collection.field` as ready again.
    pub fn build_index(&self, collection: &str, field: &str) {
        self.missing_indexes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(collection.to_string(), field.to_string()));
    }

    /// Terminate every live subscription with an `Unavailable` error.
    pub fn fail_watchers(&self, reason: &str) {
        self.router.fail_all(StoreError::Unavailable(reason.to_string()));
    }

    /// Number of live subscriptions.
    pub fn watcher_count(&self) -> usize {
        self.router.watcher_count()
    }

    /// Number of documents in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Returns `true` if `collection` holds no documents.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// All documents of `collection` in key order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The clock stamping this store's writes.
    pub fn clock(&self) -> &ServerClock {
        &self.clock
    }

    fn rules(&self) -> AccessRules {
        *self.rules.read().unwrap_or_else(|e| e.into_inner())
    }

    fn check_read(&self, collection: &str) -> StoreResult<()> {
        if self.rules().allow_read {
            Ok(())
        } else {
            Err(StoreError::PermissionDenied(format!("read on {collection}")))
        }
    }

    fn check_write(&self, collection: &str) -> StoreResult<()> {
        if self.rules().allow_write {
            Ok(())
        } else {
            Err(StoreError::PermissionDenied(format!("write on {collection}")))
        }
    }

    fn index_ready(&self, collection: &str, field: &str) -> bool {
        !self
            .missing_indexes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&(collection.to_string(), field.to_string()))
    }

    /// Apply one write under the collection lock and publish the result.
    ///
    /// `apply` receives the current document (if any) and the write's server
    /// time, and returns the document's new fields.
    fn commit<F>(&self, collection: &str, id: &str, apply: F) -> StoreResult<Document>
    where
        F: FnOnce(Option<&Document>, ServerTimestamp) -> StoreResult<Map<String, Value>>,
    {
        self.check_write(collection)?;
        if id.is_empty() {
            return Err(StoreError::InvalidPath {
                path: format!("{collection}/"),
                reason: "empty document id".to_string(),
            });
        }

        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        let docs = collections.entry(collection.to_string()).or_default();

        let existing = docs.get(id);
        let now = self.clock.now();
        let fields = apply(existing, now)?;
        let version = existing.map_or(1, |d| d.version + 1);

        let doc = Document {
            id: id.to_string(),
            fields,
            version,
            update_time: now,
        };
        docs.insert(id.to_string(), doc.clone());

        let snapshot: Vec<Document> = docs.values().cloned().collect();
        self.router.publish(collection, &snapshot);

        debug!(collection, id, version, "document committed");
        Ok(doc)
    }
}

fn apply_transforms(
    fields: &mut Map<String, Value>,
    transforms: &[FieldTransform],
    now: ServerTimestamp,
) -> StoreResult<()> {
    let stamp = serde_json::to_value(now).map_err(|e| StoreError::Serialization(e.to_string()))?;
    for transform in transforms {
        match transform {
            FieldTransform::ServerTimestamp(field) => {
                fields.insert(field.clone(), stamp.clone());
            }
            FieldTransform::ServerTimestampIfAbsent(field) => {
                if !fields.contains_key(field) {
                    fields.insert(field.clone(), stamp.clone());
                }
            }
        }
    }
    Ok(())
}

fn not_found(collection: &str, id: &str) -> StoreError {
    StoreError::NotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.check_read(collection)?;
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        Ok(collections.get(collection).and_then(|docs| docs.get(id)).cloned())
    }

    async fn set_merge(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
        transforms: &[FieldTransform],
    ) -> StoreResult<Document> {
        self.commit(collection, id, |existing, now| {
            let mut merged = existing.map(|d| d.fields.clone()).unwrap_or_default();
            merge_fields(&mut merged, fields);
            apply_transforms(&mut merged, transforms, now)?;
            Ok(merged)
        })
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
        transforms: &[FieldTransform],
        precondition: Precondition,
    ) -> StoreResult<Document> {
        self.commit(collection, id, |existing, now| {
            let existing = existing.ok_or_else(|| not_found(collection, id))?;
            if let Precondition::Version(expected) = precondition {
                if existing.version != expected {
                    return Err(StoreError::Conflict {
                        id: id.to_string(),
                        expected,
                        actual: existing.version,
                    });
                }
            }
            let mut updated = existing.fields.clone();
            updated.extend(fields);
            apply_transforms(&mut updated, transforms, now)?;
            Ok(updated)
        })
    }

    async fn append_to_array(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
        transforms: &[FieldTransform],
    ) -> StoreResult<Document> {
        self.commit(collection, id, |existing, now| {
            let existing = existing.ok_or_else(|| not_found(collection, id))?;
            let mut updated = existing.fields.clone();
            let mut items = match updated.remove(field) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items,
                Some(_) => {
                    return Err(StoreError::Serialization(format!(
                        "field {field} of {collection}/{id} is not an array"
                    )))
                }
            };
            items.push(value);
            updated.insert(field.to_string(), Value::Array(items));
            apply_transforms(&mut updated, transforms, now)?;
            Ok(updated)
        })
    }

    async fn ordering_available(&self, collection: &str, field: &str) -> StoreResult<bool> {
        self.check_read(collection)?;
        Ok(self.index_ready(collection, field))
    }

    async fn subscribe(&self, query: Query) -> StoreResult<SnapshotStream> {
        self.check_read(&query.collection)?;
        if let Some(order) = &query.order_by {
            if !self.index_ready(&query.collection, &order.field) {
                return Err(StoreError::IndexUnavailable {
                    collection: query.collection.clone(),
                    field: order.field.clone(),
                });
            }
        }
        // Hold the read lock while registering so no write slips between the
        // initial snapshot and the first published one.
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());
        let current: Vec<Document> = collections
            .get(&query.collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default();
        debug!(collection = %query.collection, ordered = query.order_by.is_some(), "watch registered");
        Ok(self.router.register(query, current))
    }
}

impl std::fmt::Debug for InMemoryDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count: usize = self
            .collections
            .read()
            .map(|c| c.values().map(BTreeMap::len).sum())
            .unwrap_or(0);
        f.debug_struct("InMemoryDocumentStore")
            .field("document_count", &count)
            .field("rules", &self.rules())
            .finish()
    }
}
