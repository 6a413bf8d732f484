//! The [`DocumentStore`] trait and the values it exchanges.

use std::cmp::Ordering;

use async_trait::async_trait;
use denuncia_types::ServerTimestamp;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::StoreResult;

/// A stored document as the store sees it.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    /// Caller-assigned key, unique within its collection.
    pub id: String,
    /// Stored fields, server timestamps included.
    pub fields: Map<String, Value>,
    /// Optimistic-concurrency token; starts at 1 and grows on every write.
    pub version: u64,
    /// Server time of the last write.
    pub update_time: ServerTimestamp,
}

impl Document {
    /// Decode a field written by a server timestamp transform.
    pub fn timestamp(&self, field: &str) -> Option<ServerTimestamp> {
        self.fields
            .get(field)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Server-side value applied to a field as part of a write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldTransform {
    /// Stamp the field with the write's server time.
    ServerTimestamp(String),
    /// Stamp the field only if the document does not already carry it.
    ServerTimestampIfAbsent(String),
}

impl FieldTransform {
    pub fn field(&self) -> &str {
        match self {
            Self::ServerTimestamp(f) | Self::ServerTimestampIfAbsent(f) => f,
        }
    }
}

/// Condition a partial update must satisfy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Precondition {
    /// The document must exist.
    #[default]
    Exists,
    /// The document must exist at exactly this version.
    Version(u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// A collection-level query for live subscriptions.
///
/// Without `order_by` documents arrive in key order; with it the store sorts
/// server-side, which requires a ready index for that field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    pub collection: String,
    pub order_by: Option<OrderBy>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            order_by: None,
        }
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Sort `docs` the way this query orders results.
    pub fn sort(&self, docs: &mut [Document]) {
        match &self.order_by {
            None => docs.sort_by(|a, b| a.id.cmp(&b.id)),
            Some(order) => docs.sort_by(|a, b| {
                let ord = compare_values(a.fields.get(&order.field), b.fields.get(&order.field))
                    .then_with(|| a.id.cmp(&b.id));
                match order.direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            }),
        }
    }
}

/// Live stream of query snapshots.
///
/// The first item is the snapshot at subscribe time; one item follows every
/// change to the collection. An `Err` item ends the stream.
#[derive(Debug)]
pub struct SnapshotStream {
    receiver: mpsc::UnboundedReceiver<StoreResult<Vec<Document>>>,
}

impl SnapshotStream {
    pub fn new(receiver: mpsc::UnboundedReceiver<StoreResult<Vec<Document>>>) -> Self {
        Self { receiver }
    }

    /// Wait for the next snapshot. `None` once the store dropped the watch.
    pub async fn next(&mut self) -> Option<StoreResult<Vec<Document>>> {
        self.receiver.recv().await
    }
}

/// Remote document store keyed by collection and string id.
///
/// Implementations must be thread-safe and honour these contracts:
/// - `get` returns `Ok(None)` for a missing document, never an error.
/// - `set_merge` creates or merges; fields not named in the write survive.
/// - `update` and `append_to_array` fail with `NotFound` on a missing document.
/// - Every successful write stamps transforms with one server time and bumps
///   the version.
/// - Subscribers observe every committed write.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document.
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Create the document or deep-merge `fields` into it.
    async fn set_merge(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
        transforms: &[FieldTransform],
    ) -> StoreResult<Document>;

    /// Replace the named top-level fields of an existing document.
    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
        transforms: &[FieldTransform],
        precondition: Precondition,
    ) -> StoreResult<Document>;

    /// Atomically append `value` to the array at `field` (missing = empty).
    async fn append_to_array(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
        transforms: &[FieldTransform],
    ) -> StoreResult<Document>;

    /// Whether server-side ordering on `field` can be served right now.
    async fn ordering_available(&self, collection: &str, field: &str) -> StoreResult<bool>;

    /// Open a live subscription for `query`.
    async fn subscribe(&self, query: Query) -> StoreResult<SnapshotStream>;
}

/// Deep-merge `patch` into `target`: nested objects merge, everything else
/// replaces.
pub fn merge_fields(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_fields(existing, incoming);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// Total order over field values used by ordered queries.
///
/// Type ranks: missing/null < bool < number < server timestamp < string <
/// array < object. Values of the same rank compare naturally.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank_a = rank(a);
    let rank_b = rank(b);
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(Some(l), Some(r));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Some(x @ Value::Object(_)), Some(y @ Value::Object(_))) => {
            match (as_timestamp(x), as_timestamp(y)) {
                (Some(tx), Some(ty)) => tx.cmp(&ty),
                _ => x.to_string().cmp(&y.to_string()),
            }
        }
        _ => Ordering::Equal,
    }
}

fn as_timestamp(value: &Value) -> Option<ServerTimestamp> {
    serde_json::from_value(value.clone()).ok()
}

fn rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(v @ Value::Object(_)) if as_timestamp(v).is_some() => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}
