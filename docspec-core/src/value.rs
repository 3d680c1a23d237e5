//! Native value model held by records.
//!
//! A [`Value`] is what application code reads from and assigns to a record field. Field
//! specs translate values to and from the storage representation ([`Bson`]) and the wire
//! representation ([`JsonValue`]).

use std::fmt;

use bson::{oid::ObjectId, Bson};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Number, Value as JsonValue};

use crate::{
    document::Document,
    error::{DocumentStoreError, DocumentStoreResult},
    record::Record,
};

/// The opaque JSON object held by map fields.
pub type JsonMap = Map<String, JsonValue>;

/// A field value in its native representation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    /// A document identity.
    ObjectId(ObjectId),
    /// A UTC timestamp. Field specs truncate it to millisecond precision.
    DateTime(DateTime<Utc>),
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// A homogeneous list or a fixed tuple.
    List(Vec<Value>),
    /// An untyped structured map passed through unchanged.
    Map(JsonMap),
    /// A reference to another document, resolved or not.
    Reference(Reference),
    /// An embedded record.
    Nested(Box<Record>),
}

/// The variant of a [`Value`], reported by validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Null,
    ObjectId,
    DateTime,
    Bool,
    Int,
    Float,
    String,
    List,
    Map,
    Reference,
    Nested,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueType::Null => "null",
            ValueType::ObjectId => "object id",
            ValueType::DateTime => "datetime",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::String => "string",
            ValueType::List => "list",
            ValueType::Map => "map",
            ValueType::Reference => "reference",
            ValueType::Nested => "nested record",
        })
    }
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::ObjectId(_) => ValueType::ObjectId,
            Value::DateTime(_) => ValueType::DateTime,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::List(_) => ValueType::List,
            Value::Map(_) => ValueType::Map,
            Value::Reference(_) => ValueType::Reference,
            Value::Nested(_) => ValueType::Nested,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Length of sized values (characters of a string, elements of a list, entries of a map).
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::String(value) => Some(value.chars().count()),
            Value::List(values) => Some(values.len()),
            Value::Map(map) => Some(map.len()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Numeric value widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Value::ObjectId(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::List(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&JsonMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut JsonMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Value::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Nested(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Value::Nested(record) => Some(record),
            _ => None,
        }
    }
}

/// A reference to another document.
///
/// References are stored as identities and only turned into full documents on
/// demand (see [`Record::populate`]). Two references are equal when they point at the
/// same identity, whether resolved or not.
#[derive(Debug, Clone)]
pub enum Reference {
    /// An identity plus the collection key it lives in, when known.
    Unresolved {
        id: ObjectId,
        collection: Option<String>,
    },
    /// The fully loaded target document.
    Resolved(Box<Document>),
}

impl Reference {
    pub fn unresolved(id: ObjectId, collection: impl Into<String>) -> Self {
        Reference::Unresolved { id, collection: Some(collection.into()) }
    }

    /// Identity of the target document, if it has one.
    pub fn id(&self) -> Option<ObjectId> {
        match self {
            Reference::Unresolved { id, .. } => Some(*id),
            Reference::Resolved(document) => document.id(),
        }
    }

    /// Collection key of the target document.
    pub fn collection(&self) -> Option<String> {
        match self {
            Reference::Unresolved { collection, .. } => collection.clone(),
            Reference::Resolved(document) => document
                .schema()
                .collection()
                .map(|key| key.to_string()),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Reference::Resolved(_))
    }

    pub fn document(&self) -> Option<&Document> {
        match self {
            Reference::Resolved(document) => Some(document),
            Reference::Unresolved { .. } => None,
        }
    }

    pub fn document_mut(&mut self) -> Option<&mut Document> {
        match self {
            Reference::Resolved(document) => Some(document),
            Reference::Unresolved { .. } => None,
        }
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        match (self.id(), other.id()) {
            (Some(left), Some(right)) => left == right,
            _ => false,
        }
    }
}

/// Parses a 24 character hex string into an identity.
pub fn parse_object_id(hex: &str) -> DocumentStoreResult<ObjectId> {
    ObjectId::parse_str(hex)
        .map_err(|e| DocumentStoreError::InvalidIdentity(format!("{hex}: {e}")))
}

/// Truncates a timestamp to the millisecond precision kept by the store.
pub(crate) fn truncate_millis(value: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(value.timestamp_millis())
        .single()
        .unwrap_or(value)
}

/// Converts an opaque JSON value into BSON without type hints.
pub(crate) fn json_to_bson(value: &JsonValue) -> Bson {
    match value {
        JsonValue::Null => Bson::Null,
        JsonValue::Bool(value) => Bson::Boolean(*value),
        JsonValue::Number(number) => match number.as_i64() {
            Some(value) => Bson::Int64(value),
            None => Bson::Double(number.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(value) => Bson::String(value.clone()),
        JsonValue::Array(values) => Bson::Array(values.iter().map(json_to_bson).collect()),
        JsonValue::Object(map) => Bson::Document(json_map_to_document(map)),
    }
}

pub(crate) fn json_map_to_document(map: &JsonMap) -> bson::Document {
    map.iter()
        .map(|(key, value)| (key.clone(), json_to_bson(value)))
        .collect()
}

/// Converts a BSON value into plain JSON. Types without a natural JSON form are
/// rendered as strings.
pub(crate) fn bson_to_json(value: &Bson) -> JsonValue {
    match value {
        Bson::Null | Bson::Undefined => JsonValue::Null,
        Bson::Boolean(value) => JsonValue::Bool(*value),
        Bson::Int32(value) => JsonValue::from(*value),
        Bson::Int64(value) => JsonValue::from(*value),
        Bson::Double(value) => float_to_json(*value),
        Bson::String(value) => JsonValue::String(value.clone()),
        Bson::ObjectId(id) => JsonValue::String(id.to_hex()),
        Bson::DateTime(value) => JsonValue::String(datetime_to_wire(value.to_chrono())),
        Bson::Array(values) => JsonValue::Array(values.iter().map(bson_to_json).collect()),
        Bson::Document(document) => JsonValue::Object(document_to_json_map(document)),
        other => JsonValue::String(other.to_string()),
    }
}

/// RFC 3339 rendering with millisecond precision, used for timestamps on the wire.
pub(crate) fn datetime_to_wire(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub(crate) fn document_to_json_map(document: &bson::Document) -> JsonMap {
    document
        .iter()
        .map(|(key, value)| (key.clone(), bson_to_json(value)))
        .collect()
}

pub(crate) fn float_to_json(value: f64) -> JsonValue {
    Number::from_f64(value)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<ObjectId> for Value {
    fn from(value: ObjectId) -> Self {
        Value::ObjectId(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::DateTime(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(values: Vec<Value>) -> Self {
        Value::List(values)
    }
}

impl From<JsonMap> for Value {
    fn from(map: JsonMap) -> Self {
        Value::Map(map)
    }
}

impl From<Reference> for Value {
    fn from(reference: Reference) -> Self {
        Value::Reference(reference)
    }
}

impl From<Document> for Value {
    fn from(document: Document) -> Self {
        Value::Reference(Reference::Resolved(Box::new(document)))
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Nested(Box::new(record))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn references_compare_by_identity() {
        let id = ObjectId::new();

        assert_eq!(
            Reference::unresolved(id, "users"),
            Reference::Unresolved { id, collection: None },
        );
        assert_ne!(
            Reference::unresolved(id, "users"),
            Reference::unresolved(ObjectId::new(), "users"),
        );
    }

    #[test]
    fn lengths_are_reported_for_sized_values() {
        assert_eq!(Value::from("héllo").len(), Some(5));
        assert_eq!(Value::from(vec![Value::Int(1), Value::Null]).len(), Some(2));
        assert_eq!(Value::Int(4).len(), None);
    }

    #[test]
    fn opaque_json_survives_a_bson_round_trip() {
        let original = json!({
            "name": "widget",
            "tags": ["a", "b"],
            "size": { "w": 2, "h": 1.5 },
            "enabled": true,
            "note": null,
        });
        let map = original.as_object().cloned().unwrap_or_default();

        let restored = document_to_json_map(&json_map_to_document(&map));

        assert_eq!(JsonValue::Object(restored), original);
    }

    #[test]
    fn parse_object_id_rejects_malformed_hex() {
        assert!(parse_object_id("not-an-id").is_err());

        let id = ObjectId::new();
        assert_eq!(parse_object_id(&id.to_hex()).ok(), Some(id));
    }
}
