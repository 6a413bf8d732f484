use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{TypeError, TypeResult};
use crate::protocol::ProtocolId;
use crate::timestamp::ServerTimestamp;

/// Stored field names with meaning to the access layer.
pub mod field {
    pub const ID: &str = "id";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";
    pub const NOTES: &str = "notes";
    pub const STATUS: &str = "status";

    /// Fields a caller may not supply in a report payload.
    pub const RESERVED: [&str; 3] = [ID, CREATED_AT, UPDATED_AT];

    pub fn is_reserved(name: &str) -> bool {
        RESERVED.contains(&name)
    }
}

/// Opaque administrative note.
///
/// The access layer never inspects a note; it only appends it to the end of
/// a report's `notes` sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Note(pub Value);

impl Note {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for Note {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<&str> for Note {
    fn from(text: &str) -> Self {
        Self(Value::String(text.to_string()))
    }
}

/// A complaint report.
///
/// Invariants held by the stores and the access layer:
/// - `id` never changes once the report exists.
/// - `created_at` is written once, on the first write.
/// - `notes` only grows, in insertion order.
///
/// Every other stored field (`status` included) is opaque and lives in
/// `fields` unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: ProtocolId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<ServerTimestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<ServerTimestamp>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<Note>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Report {
    /// Decode a report from its key and stored fields.
    ///
    /// The key always wins over any `id` value found among the fields.
    pub fn from_fields(id: ProtocolId, fields: &Map<String, Value>) -> TypeResult<Self> {
        let mut object = fields.clone();
        object.insert(field::ID.to_string(), Value::String(id.into_inner()));
        if let Some(notes) = object.get(field::NOTES) {
            if !notes.is_array() && !notes.is_null() {
                return Err(TypeError::InvalidField {
                    field: field::NOTES.to_string(),
                    reason: "expected an array".to_string(),
                });
            }
        }
        if object.get(field::NOTES).is_some_and(Value::is_null) {
            object.remove(field::NOTES);
        }
        serde_json::from_value(Value::Object(object))
            .map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// The free-form `status` field, when it is a string.
    pub fn status(&self) -> Option<&str> {
        self.fields.get(field::STATUS).and_then(Value::as_str)
    }

    /// Look up an opaque field by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// The full report as a JSON object (`id` plus all stored fields).
    pub fn to_json(&self) -> TypeResult<Value> {
        serde_json::to_value(self).map_err(|e| TypeError::Serialization(e.to_string()))
    }
}
