//! Field specs: the declarative description of one record attribute.
//!
//! A [`FieldSpec`] fixes which values a field accepts, which constraints they must satisfy
//! and how they are transformed between the native ([`Value`]), storage ([`Bson`]) and
//! wire ([`JsonValue`]) representations. Specs are built once through [`FieldSpecBuilder`]
//! and are immutable afterwards.
//!
//! # Example
//!
//! ```ignore
//! use docspec::field::{FieldSpec, Validator};
//!
//! let age = FieldSpec::numeric().min(0).max(150).required().build()?;
//! let code = FieldSpec::text()
//!     .fixed_length(3)
//!     .pattern("[A-Z]+")
//!     .validator(Validator::reject(|v| v.as_str() == Some("XXX"), "reserved code"))
//!     .build()?;
//! let tags = FieldSpec::list(FieldSpec::text().max_length(16).build()?).build()?;
//! ```
//!
//! # Validation order
//!
//! Rules run in this order and the first failing rule of a field stops its chain:
//! non-null, type membership, choice set, fixed length, max length, numeric bounds,
//! pattern, element/position delegation for lists and tuples, custom validators. A null
//! value on a nullable field skips the chain entirely.

use std::{fmt, sync::Arc};

use bson::Bson;
use chrono::{DateTime, TimeZone, Utc};
use futures::future::{BoxFuture, FutureExt};
use regex::Regex;
use serde_json::Value as JsonValue;

use crate::{
    error::{DocumentStoreError, DocumentStoreResult, FieldValidationError, ValidationReport},
    record::{PopulateOutcome, Record},
    registry::Registry,
    schema::Schema,
    value::{
        datetime_to_wire, document_to_json_map, float_to_json, json_map_to_document,
        parse_object_id, truncate_millis, Reference, Value,
    },
};

type Predicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
type Check = Arc<dyn Fn(&Value, &str) -> Result<(), FieldValidationError> + Send + Sync>;

/// A custom validator attached to a field.
#[derive(Clone)]
pub enum Validator {
    /// Fails with `message` when the predicate returns `true`.
    Reject { predicate: Predicate, message: String },
    /// A callable that raises its own error.
    Check(Check),
}

impl Validator {
    pub fn reject<F>(predicate: F, message: impl Into<String>) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Validator::Reject { predicate: Arc::new(predicate), message: message.into() }
    }

    pub fn check<F>(check: F) -> Self
    where
        F: Fn(&Value, &str) -> Result<(), FieldValidationError> + Send + Sync + 'static,
    {
        Validator::Check(Arc::new(check))
    }

    fn run(&self, value: &Value, name: &str) -> Result<(), FieldValidationError> {
        match self {
            Validator::Reject { predicate, message } => match predicate(value) {
                true => Err(FieldValidationError::new(name, value, message.clone())),
                false => Ok(()),
            },
            Validator::Check(check) => check(value, name),
        }
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validator::Reject { message, .. } => f
                .debug_struct("Reject")
                .field("message", message)
                .finish_non_exhaustive(),
            Validator::Check(_) => f.write_str("Check(..)"),
        }
    }
}

/// The variant of a field, which determines its accepted values and transforms.
#[derive(Debug, Clone)]
pub enum FieldKind {
    ObjectId,
    DateTime,
    Boolean,
    /// Integers and floats, with optional inclusive bounds.
    Numeric { min: Option<f64>, max: Option<f64> },
    /// Strings, optionally matched against a pattern anchored at the start.
    Text { pattern: Option<Regex> },
    /// A reference to a document of one collection key.
    Reference { target: String },
    /// A reference to a document of any collection; stored as `[id, collection]`.
    AnyReference,
    List { element: Arc<FieldSpec>, remove_none_values: bool },
    Tuple { elements: Vec<Arc<FieldSpec>> },
    /// An opaque JSON object.
    Map,
    Nested { schema: Arc<Schema> },
}

impl FieldKind {
    fn describe(&self) -> &'static str {
        match self {
            FieldKind::ObjectId => "object id",
            FieldKind::DateTime => "datetime",
            FieldKind::Boolean => "bool",
            FieldKind::Numeric { .. } => "number",
            FieldKind::Text { .. } => "string",
            FieldKind::Reference { .. } | FieldKind::AnyReference => "reference",
            FieldKind::List { .. } => "list",
            FieldKind::Tuple { .. } => "tuple",
            FieldKind::Map => "map",
            FieldKind::Nested { .. } => "nested record",
        }
    }
}

/// An immutable field declaration.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    kind: FieldKind,
    nullable: bool,
    default: Value,
    choices: Vec<Value>,
    max_length: Option<usize>,
    fixed_length: Option<usize>,
    validators: Vec<Validator>,
    transient: bool,
    omit_if_none: bool,
    key: Option<String>,
}

impl FieldSpec {
    pub fn object_id() -> FieldSpecBuilder {
        FieldSpecBuilder::new(FieldKind::ObjectId)
    }

    pub fn datetime() -> FieldSpecBuilder {
        FieldSpecBuilder::new(FieldKind::DateTime)
    }

    pub fn boolean() -> FieldSpecBuilder {
        FieldSpecBuilder::new(FieldKind::Boolean)
    }

    pub fn numeric() -> FieldSpecBuilder {
        FieldSpecBuilder::new(FieldKind::Numeric { min: None, max: None })
    }

    pub fn text() -> FieldSpecBuilder {
        FieldSpecBuilder::new(FieldKind::Text { pattern: None })
    }

    /// A reference to documents registered under `target` (a collection key).
    pub fn reference(target: impl Into<String>) -> FieldSpecBuilder {
        FieldSpecBuilder::new(FieldKind::Reference { target: target.into() })
    }

    pub fn any_reference() -> FieldSpecBuilder {
        FieldSpecBuilder::new(FieldKind::AnyReference)
    }

    /// A homogeneous list whose elements are checked and transformed by `element`.
    /// Lists default to an empty list.
    pub fn list(element: FieldSpec) -> FieldSpecBuilder {
        FieldSpecBuilder::new(FieldKind::List {
            element: Arc::new(element),
            remove_none_values: false,
        })
    }

    /// A fixed-arity tuple with one spec per position.
    pub fn tuple(elements: impl IntoIterator<Item = FieldSpec>) -> FieldSpecBuilder {
        FieldSpecBuilder::new(FieldKind::Tuple {
            elements: elements.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn map() -> FieldSpecBuilder {
        FieldSpecBuilder::new(FieldKind::Map)
    }

    pub fn nested(schema: &Arc<Schema>) -> FieldSpecBuilder {
        FieldSpecBuilder::new(FieldKind::Nested { schema: Arc::clone(schema) })
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// A required field rejects null.
    pub fn is_required(&self) -> bool {
        !self.nullable
    }

    pub fn default(&self) -> &Value {
        &self.default
    }

    pub fn choices(&self) -> &[Value] {
        &self.choices
    }

    /// Explicit storage and wire key, if one was declared.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn omits_if_none(&self) -> bool {
        self.omit_if_none
    }

    /// Validates `value` as the content of field `name`, stopping at the first failure.
    pub fn validate(&self, value: &Value, name: &str) -> Result<(), FieldValidationError> {
        let mut errors = Vec::new();
        self.check(value, name, &mut errors, true);

        match errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Validates `value` and records every failure into `report` under `path`.
    pub fn collect_errors(&self, value: &Value, path: &str, report: &mut ValidationReport) {
        let mut errors = Vec::new();
        self.check(value, path, &mut errors, false);

        for err in errors {
            report.push(err.field, err.message);
        }
    }

    pub(crate) fn check(
        &self,
        value: &Value,
        path: &str,
        out: &mut Vec<FieldValidationError>,
        fail_fast: bool,
    ) {
        if value.is_null() {
            if !self.nullable {
                out.push(FieldValidationError::new(path, value, "cannot assign null to a required field"));
            }
            return;
        }

        if !self.accepts(value) {
            out.push(FieldValidationError::new(
                path,
                value,
                format!("invalid data type, expected {}", self.kind.describe()),
            ));
            return;
        }

        let before = out.len();
        macro_rules! fail {
            ($message:expr) => {{
                out.push(FieldValidationError::new(path, value, $message));
                if fail_fast {
                    return;
                }
            }};
        }

        if !self.choices.is_empty() && !self.choices.iter().any(|choice| same_choice(choice, value)) {
            fail!("value is not within choices");
        }

        if let Some(length) = self.fixed_length {
            if value.len() != Some(length) {
                fail!(format!("value must be {length} long"));
            }
        }

        if let Some(max) = self.max_length {
            match value.len() {
                Some(length) if length <= max => {}
                _ => fail!(format!("value must not be longer than {max}")),
            }
        }

        match (&self.kind, value) {
            (FieldKind::Numeric { min, max }, _) => {
                let number = value.as_f64().unwrap_or_default();
                if let Some(max) = max {
                    if number > *max {
                        fail!(format!("must be at most {max}"));
                    }
                }
                if let Some(min) = min {
                    if number < *min {
                        fail!(format!("must be at least {min}"));
                    }
                }
            }
            (FieldKind::Text { pattern: Some(pattern) }, Value::String(text)) => {
                if !pattern.is_match(text) {
                    fail!("must match the declared pattern");
                }
            }
            (FieldKind::List { element, .. }, Value::List(items)) => {
                for (index, item) in items.iter().enumerate() {
                    element.check(item, &format!("{path}.{index}"), out, fail_fast);
                    if fail_fast && out.len() > before {
                        return;
                    }
                }
            }
            (FieldKind::Tuple { elements }, Value::List(items)) => {
                if items.len() != elements.len() {
                    fail!(format!("expected a tuple of {} elements", elements.len()));
                } else {
                    for (index, (spec, item)) in elements.iter().zip(items).enumerate() {
                        spec.check(item, &format!("{path}.{index}"), out, fail_fast);
                        if fail_fast && out.len() > before {
                            return;
                        }
                    }
                }
            }
            (FieldKind::Nested { .. }, Value::Nested(record)) => {
                record.check_fields(path, out, fail_fast);
                if fail_fast && out.len() > before {
                    return;
                }
            }
            _ => {}
        }

        for validator in &self.validators {
            if let Err(err) = validator.run(value, path) {
                out.push(err);
                if fail_fast {
                    return;
                }
            }
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match (&self.kind, value) {
            (FieldKind::ObjectId, Value::ObjectId(_))
            | (FieldKind::DateTime, Value::DateTime(_))
            | (FieldKind::Boolean, Value::Bool(_))
            | (FieldKind::Numeric { .. }, Value::Int(_) | Value::Float(_))
            | (FieldKind::Text { .. }, Value::String(_))
            | (FieldKind::AnyReference, Value::Reference(_))
            | (FieldKind::List { .. } | FieldKind::Tuple { .. }, Value::List(_))
            | (FieldKind::Map, Value::Map(_)) => true,
            (FieldKind::Reference { target }, Value::Reference(reference)) => match reference {
                Reference::Unresolved { .. } => true,
                Reference::Resolved(document) => document
                    .schema()
                    .collection()
                    .map(|key| key.to_string())
                    .is_some_and(|key| key == *target || key.starts_with(&format!("{target}:"))),
            },
            (FieldKind::Nested { schema }, Value::Nested(record)) => {
                record.schema().is_subtype_of(schema)
            }
            _ => false,
        }
    }

    /// Normalizes a value assigned by application code.
    ///
    /// Timestamps are truncated to milliseconds, bare identities assigned to a reference
    /// field become unresolved references and integers assigned to a boolean become bools.
    pub fn from_native(&self, value: Value) -> Value {
        match (&self.kind, value) {
            (FieldKind::DateTime, Value::DateTime(value)) => Value::DateTime(truncate_millis(value)),
            (FieldKind::Boolean, Value::Int(value)) => Value::Bool(value != 0),
            (FieldKind::Reference { target }, Value::ObjectId(id)) => {
                Value::Reference(Reference::unresolved(id, target.clone()))
            }
            (FieldKind::List { element, .. }, Value::List(items)) => Value::List(
                items
                    .into_iter()
                    .map(|item| element.from_native(item))
                    .collect(),
            ),
            (FieldKind::Tuple { elements }, Value::List(items)) => Value::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| match elements.get(index) {
                        Some(spec) => spec.from_native(item),
                        None => item,
                    })
                    .collect(),
            ),
            (_, value) => value,
        }
    }

    /// Storage representation of `value`.
    pub fn to_storage(&self, value: &Value) -> Bson {
        match (&self.kind, value) {
            (_, Value::Null) => Bson::Null,
            (FieldKind::AnyReference, Value::Reference(reference)) => match reference.id() {
                Some(id) => Bson::Array(vec![
                    Bson::ObjectId(id),
                    reference.collection().map(Bson::String).unwrap_or(Bson::Null),
                ]),
                None => Bson::Null,
            },
            (FieldKind::List { element, .. }, Value::List(items)) => {
                Bson::Array(items.iter().map(|item| element.to_storage(item)).collect())
            }
            (FieldKind::Tuple { elements }, Value::List(items)) => Bson::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| match elements.get(index) {
                        Some(spec) => spec.to_storage(item),
                        None => value_to_bson(item),
                    })
                    .collect(),
            ),
            _ => value_to_bson(value),
        }
    }

    /// Native value of a stored `raw` value.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidDocument`] when the stored shape does not match
    /// the field variant.
    pub fn from_storage(&self, raw: &Bson) -> DocumentStoreResult<Value> {
        if matches!(raw, Bson::Null | Bson::Undefined) {
            return Ok(Value::Null);
        }

        match (&self.kind, raw) {
            (FieldKind::ObjectId, Bson::ObjectId(id)) => Ok(Value::ObjectId(*id)),
            (FieldKind::ObjectId, Bson::String(hex)) => parse_object_id(hex).map(Value::ObjectId),
            (FieldKind::DateTime, Bson::DateTime(value)) => Ok(Value::DateTime(value.to_chrono())),
            (FieldKind::Boolean, Bson::Boolean(value)) => Ok(Value::Bool(*value)),
            (FieldKind::Boolean, Bson::Int32(value)) => Ok(Value::Bool(*value != 0)),
            (FieldKind::Boolean, Bson::Int64(value)) => Ok(Value::Bool(*value != 0)),
            (FieldKind::Numeric { .. }, Bson::Int32(value)) => Ok(Value::Int(*value as i64)),
            (FieldKind::Numeric { .. }, Bson::Int64(value)) => Ok(Value::Int(*value)),
            (FieldKind::Numeric { .. }, Bson::Double(value)) => Ok(Value::Float(*value)),
            (FieldKind::Text { .. }, Bson::String(value)) => Ok(Value::String(value.clone())),
            (FieldKind::Reference { target }, Bson::ObjectId(id)) => {
                Ok(Value::Reference(Reference::unresolved(*id, target.clone())))
            }
            (FieldKind::AnyReference, Bson::Array(pair)) => match pair.as_slice() {
                [Bson::ObjectId(id), Bson::String(collection)] => {
                    Ok(Value::Reference(Reference::unresolved(*id, collection.clone())))
                }
                _ => Err(DocumentStoreError::InvalidDocument(
                    "expected an [id, collection] pair in storage".to_string(),
                )),
            },
            (FieldKind::List { element, .. }, Bson::Array(items)) => items
                .iter()
                .map(|item| element.from_storage(item))
                .collect::<DocumentStoreResult<Vec<_>>>()
                .map(Value::List),
            (FieldKind::Tuple { elements }, Bson::Array(items)) => {
                if items.len() != elements.len() {
                    return Err(DocumentStoreError::InvalidDocument(format!(
                        "expected a tuple of {} elements in storage, found {}",
                        elements.len(),
                        items.len(),
                    )));
                }
                elements
                    .iter()
                    .zip(items)
                    .map(|(spec, item)| spec.from_storage(item))
                    .collect::<DocumentStoreResult<Vec<_>>>()
                    .map(Value::List)
            }
            (FieldKind::Map, Bson::Document(document)) => Ok(Value::Map(document_to_json_map(document))),
            (FieldKind::Nested { schema }, Bson::Document(document)) => {
                Record::from_storage(schema, document).map(Value::from)
            }
            (kind, other) => Err(DocumentStoreError::InvalidDocument(format!(
                "expected {} in storage, found {:?}",
                kind.describe(),
                other.element_type(),
            ))),
        }
    }

    /// Wire representation of `value`.
    pub fn to_wire(&self, value: &Value) -> JsonValue {
        match (&self.kind, value) {
            (_, Value::Null) => JsonValue::Null,
            (FieldKind::AnyReference, Value::Reference(reference)) => match reference {
                Reference::Resolved(document) => {
                    let mut wire = document.to_wire();
                    wire.insert(
                        "_collection".to_string(),
                        reference.collection().map(JsonValue::String).unwrap_or(JsonValue::Null),
                    );
                    JsonValue::Object(wire)
                }
                Reference::Unresolved { id, collection } => JsonValue::Array(vec![
                    JsonValue::String(id.to_hex()),
                    collection.clone().map(JsonValue::String).unwrap_or(JsonValue::Null),
                ]),
            },
            (FieldKind::List { element, remove_none_values }, Value::List(items)) => JsonValue::Array(
                items
                    .iter()
                    .map(|item| element.to_wire(item))
                    .filter(|item| !(*remove_none_values && item.is_null()))
                    .collect(),
            ),
            (FieldKind::Tuple { elements }, Value::List(items)) => JsonValue::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| match elements.get(index) {
                        Some(spec) => spec.to_wire(item),
                        None => value_to_json(item),
                    })
                    .collect(),
            ),
            _ => value_to_json(value),
        }
    }

    /// Native value of a wire `raw` value.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidDocument`] for payloads of the wrong shape and
    /// [`DocumentStoreError::InvalidIdentity`] for malformed identities.
    pub fn from_wire(&self, raw: &JsonValue) -> DocumentStoreResult<Value> {
        if raw.is_null() {
            return Ok(Value::Null);
        }

        match (&self.kind, raw) {
            (FieldKind::ObjectId, JsonValue::String(hex)) => parse_object_id(hex).map(Value::ObjectId),
            (FieldKind::DateTime, JsonValue::String(text)) => DateTime::parse_from_rfc3339(text)
                .map(|value| Value::DateTime(truncate_millis(value.with_timezone(&Utc))))
                .map_err(|e| DocumentStoreError::InvalidDocument(format!("{text}: {e}"))),
            (FieldKind::DateTime, JsonValue::Number(seconds)) => seconds
                .as_f64()
                .and_then(|seconds| Utc.timestamp_millis_opt((seconds * 1000.0).round() as i64).single())
                .map(Value::DateTime)
                .ok_or_else(|| DocumentStoreError::InvalidDocument(format!("{seconds} is not a valid timestamp"))),
            (FieldKind::Boolean, JsonValue::Bool(value)) => Ok(Value::Bool(*value)),
            (FieldKind::Boolean, JsonValue::Number(value)) => {
                Ok(Value::Bool(value.as_f64().is_some_and(|value| value != 0.0)))
            }
            (FieldKind::Numeric { .. }, JsonValue::Number(number)) => Ok(match number.as_i64() {
                Some(value) => Value::Int(value),
                None => Value::Float(number.as_f64().unwrap_or(f64::NAN)),
            }),
            (FieldKind::Text { .. }, JsonValue::String(value)) => Ok(Value::String(value.clone())),
            (FieldKind::Reference { target }, JsonValue::String(hex)) => {
                Ok(Value::Reference(Reference::unresolved(parse_object_id(hex)?, target.clone())))
            }
            (FieldKind::Reference { target }, JsonValue::Object(embedded)) => {
                let id = embedded_id(embedded)?;
                Ok(Value::Reference(Reference::unresolved(id, target.clone())))
            }
            (FieldKind::AnyReference, JsonValue::Array(pair)) => match pair.as_slice() {
                [JsonValue::String(hex), JsonValue::String(collection)] => Ok(Value::Reference(
                    Reference::unresolved(parse_object_id(hex)?, collection.clone()),
                )),
                _ => Err(DocumentStoreError::InvalidDocument(
                    "expected an [id, collection] pair on the wire".to_string(),
                )),
            },
            (FieldKind::AnyReference, JsonValue::Object(embedded)) => {
                let id = embedded_id(embedded)?;
                match embedded.get("_collection") {
                    Some(JsonValue::String(collection)) => {
                        Ok(Value::Reference(Reference::unresolved(id, collection.clone())))
                    }
                    _ => Err(DocumentStoreError::InvalidDocument(
                        "embedded reference carries no '_collection'".to_string(),
                    )),
                }
            }
            (FieldKind::List { element, remove_none_values }, JsonValue::Array(items)) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let value = element.from_wire(item)?;
                    if !(*remove_none_values && value.is_null()) {
                        values.push(value);
                    }
                }
                Ok(Value::List(values))
            }
            (FieldKind::Tuple { elements }, JsonValue::Array(items)) => {
                if items.len() != elements.len() {
                    return Err(DocumentStoreError::InvalidDocument(format!(
                        "expected a tuple of {} elements on the wire, found {}",
                        elements.len(),
                        items.len(),
                    )));
                }
                elements
                    .iter()
                    .zip(items)
                    .map(|(spec, item)| spec.from_wire(item))
                    .collect::<DocumentStoreResult<Vec<_>>>()
                    .map(Value::List)
            }
            (FieldKind::Map, JsonValue::Object(map)) => Ok(Value::Map(map.clone())),
            (FieldKind::Nested { schema }, JsonValue::Object(map)) => {
                Record::from_wire(schema, map).map(Value::from)
            }
            (kind, other) => Err(DocumentStoreError::InvalidDocument(format!(
                "expected {} on the wire, found {other}",
                kind.describe(),
            ))),
        }
    }

    /// Resolves references inside `value`, following `path` into the resolved targets.
    ///
    /// Scalars are returned unchanged. Lists drop elements that resolve to null.
    pub fn populate<'a>(
        &'a self,
        registry: &'a Registry,
        value: Value,
        path: &'a str,
    ) -> BoxFuture<'a, DocumentStoreResult<Value>> {
        async move {
            match (&self.kind, value) {
                (_, Value::Null) => Ok(Value::Null),
                (FieldKind::Reference { target }, Value::Reference(reference)) => {
                    resolve(registry, reference, Some(target), path)
                        .await
                        .map(Value::Reference)
                }
                (FieldKind::AnyReference, Value::Reference(reference)) => {
                    resolve(registry, reference, None, path)
                        .await
                        .map(Value::Reference)
                }
                (FieldKind::List { element, .. }, Value::List(items)) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        let value = element.populate(registry, item, path).await?;
                        if !value.is_null() {
                            values.push(value);
                        }
                    }
                    Ok(Value::List(values))
                }
                (FieldKind::Tuple { elements }, Value::List(items)) => {
                    let mut values = Vec::with_capacity(items.len());
                    for (index, item) in items.into_iter().enumerate() {
                        values.push(match elements.get(index) {
                            Some(spec) => spec.populate(registry, item, path).await?,
                            None => item,
                        });
                    }
                    Ok(Value::List(values))
                }
                (FieldKind::Nested { .. }, Value::Nested(mut record)) if !path.is_empty() => {
                    match record.populate(registry, path).await {
                        PopulateOutcome::Resolved => Ok(Value::Nested(record)),
                        PopulateOutcome::Skipped(reason) => Err(DocumentStoreError::InvalidDocument(reason)),
                    }
                }
                (_, value) => Ok(value),
            }
        }
        .boxed()
    }
}

async fn resolve(
    registry: &Registry,
    reference: Reference,
    target: Option<&String>,
    path: &str,
) -> DocumentStoreResult<Reference> {
    let mut document = match reference {
        Reference::Resolved(document) => *document,
        Reference::Unresolved { id, collection } => {
            let key = match (target, collection) {
                (Some(target), _) => target.clone(),
                (None, Some(collection)) => collection,
                (None, None) => {
                    return Err(DocumentStoreError::InvalidDocument(format!(
                        "reference {id} carries no collection"
                    )));
                }
            };
            registry.factory(&key, Some(id)).await?
        }
    };

    if !path.is_empty() {
        if let PopulateOutcome::Skipped(reason) = document.populate(registry, path).await {
            return Err(DocumentStoreError::InvalidDocument(reason));
        }
    }

    Ok(Reference::Resolved(Box::new(document)))
}

fn embedded_id(embedded: &serde_json::Map<String, JsonValue>) -> DocumentStoreResult<bson::oid::ObjectId> {
    match embedded.get("_id") {
        Some(JsonValue::String(hex)) => parse_object_id(hex),
        _ => Err(DocumentStoreError::InvalidDocument(
            "embedded reference carries no '_id'".to_string(),
        )),
    }
}

/// Choice membership. Integers and floats compare by numeric value.
fn same_choice(choice: &Value, value: &Value) -> bool {
    match (choice, value) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => choice.as_f64() == value.as_f64(),
        _ => choice == value,
    }
}

fn value_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::ObjectId(id) => Bson::ObjectId(*id),
        Value::DateTime(value) => Bson::DateTime(bson::DateTime::from_chrono(*value)),
        Value::Bool(value) => Bson::Boolean(*value),
        Value::Int(value) => Bson::Int64(*value),
        Value::Float(value) => Bson::Double(*value),
        Value::String(value) => Bson::String(value.clone()),
        Value::List(items) => Bson::Array(items.iter().map(value_to_bson).collect()),
        Value::Map(map) => Bson::Document(json_map_to_document(map)),
        Value::Reference(reference) => reference.id().map(Bson::ObjectId).unwrap_or(Bson::Null),
        Value::Nested(record) => Bson::Document(record.to_storage()),
    }
}

fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::ObjectId(id) => JsonValue::String(id.to_hex()),
        Value::DateTime(value) => JsonValue::String(datetime_to_wire(*value)),
        Value::Bool(value) => JsonValue::Bool(*value),
        Value::Int(value) => JsonValue::from(*value),
        Value::Float(value) => float_to_json(*value),
        Value::String(value) => JsonValue::String(value.clone()),
        Value::List(items) => JsonValue::Array(items.iter().map(value_to_json).collect()),
        Value::Map(map) => JsonValue::Object(map.clone()),
        Value::Reference(Reference::Resolved(document)) => JsonValue::Object(document.to_wire()),
        Value::Reference(Reference::Unresolved { id, .. }) => JsonValue::String(id.to_hex()),
        Value::Nested(record) => JsonValue::Object(record.to_wire()),
    }
}

/// Builder for [`FieldSpec`]. Every field starts nullable with a null default (lists
/// default to an empty list).
#[derive(Debug)]
pub struct FieldSpecBuilder {
    kind: FieldKind,
    nullable: bool,
    default: Option<Value>,
    choices: Vec<Value>,
    max_length: Option<usize>,
    fixed_length: Option<usize>,
    min: Option<f64>,
    max: Option<f64>,
    pattern: Option<String>,
    remove_none_values: bool,
    validators: Vec<Validator>,
    transient: bool,
    omit_if_none: bool,
    key: Option<String>,
}

impl FieldSpecBuilder {
    fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            nullable: true,
            default: None,
            choices: Vec::new(),
            max_length: None,
            fixed_length: None,
            min: None,
            max: None,
            pattern: None,
            remove_none_values: false,
            validators: Vec::new(),
            transient: false,
            omit_if_none: false,
            key: None,
        }
    }

    /// Rejects null values.
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn fixed_length(mut self, fixed_length: usize) -> Self {
        self.fixed_length = Some(fixed_length);
        self
    }

    /// Inclusive lower bound of a numeric field.
    pub fn min(mut self, min: impl Into<f64>) -> Self {
        self.min = Some(min.into());
        self
    }

    /// Inclusive upper bound of a numeric field.
    pub fn max(mut self, max: impl Into<f64>) -> Self {
        self.max = Some(max.into());
        self
    }

    /// Pattern a text field must match, anchored at the start of the value.
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Drops null elements of a list on the wire.
    pub fn remove_none_values(mut self) -> Self {
        self.remove_none_values = true;
        self
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Excludes the field from storage output.
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    /// Drops the key from storage and wire output when the value is null.
    pub fn omit_if_none(mut self) -> Self {
        self.omit_if_none = true;
        self
    }

    /// Storage and wire key to use instead of the field name.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Builds the spec.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Definition`] when constraints conflict: fixed and max
    /// length together, `max <= min`, bounds on a non-numeric field, a pattern on a
    /// non-text field or an invalid pattern, `remove_none_values` on a non-list field, or
    /// a reject validator without a message.
    pub fn build(self) -> DocumentStoreResult<FieldSpec> {
        let definition = |message: String| Err(DocumentStoreError::Definition(message));

        if self.fixed_length.is_some() && self.max_length.is_some() {
            return definition("max_length and fixed_length cannot be used together".to_string());
        }

        if let Some(Validator::Reject { .. }) = self
            .validators
            .iter()
            .find(|v| matches!(v, Validator::Reject { message, .. } if message.trim().is_empty()))
        {
            return definition("reject validators require a message".to_string());
        }

        let mut kind = self.kind;

        if self.min.is_some() || self.max.is_some() {
            match &mut kind {
                FieldKind::Numeric { min, max } => {
                    if let (Some(lower), Some(upper)) = (self.min, self.max) {
                        if upper <= lower {
                            return definition(format!("max ({upper}) must be greater than min ({lower})"));
                        }
                    }
                    *min = self.min;
                    *max = self.max;
                }
                other => return definition(format!("min/max apply to numeric fields, not {}", other.describe())),
            }
        }

        if let Some(source) = &self.pattern {
            match &mut kind {
                FieldKind::Text { pattern } => {
                    let compiled = Regex::new(&format!("^(?:{source})"))
                        .map_err(|e| DocumentStoreError::Definition(format!("invalid pattern {source:?}: {e}")))?;
                    *pattern = Some(compiled);
                }
                other => return definition(format!("patterns apply to text fields, not {}", other.describe())),
            }
        }

        if self.remove_none_values {
            match &mut kind {
                FieldKind::List { remove_none_values, .. } => *remove_none_values = true,
                other => return definition(format!("remove_none_values applies to lists, not {}", other.describe())),
            }
        }

        let mut spec = FieldSpec {
            kind,
            nullable: self.nullable,
            default: Value::Null,
            choices: self.choices,
            max_length: self.max_length,
            fixed_length: self.fixed_length,
            validators: self.validators,
            transient: self.transient,
            omit_if_none: self.omit_if_none,
            key: self.key,
        };

        spec.default = match self.default {
            Some(value) => spec.from_native(value),
            None if matches!(spec.kind, FieldKind::List { .. }) => Value::List(Vec::new()),
            None => Value::Null,
        };

        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;
    use serde_json::json;

    fn built(builder: FieldSpecBuilder) -> FieldSpec {
        builder.build().expect("valid field spec")
    }

    #[test]
    fn conflicting_length_constraints_fail_construction() {
        let result = FieldSpec::text().max_length(4).fixed_length(2).build();
        assert!(matches!(result, Err(DocumentStoreError::Definition(_))));
    }

    #[test]
    fn inverted_numeric_bounds_fail_construction() {
        assert!(matches!(
            FieldSpec::numeric().min(10).max(10).build(),
            Err(DocumentStoreError::Definition(_)),
        ));
        assert!(matches!(
            FieldSpec::numeric().min(10).max(5).build(),
            Err(DocumentStoreError::Definition(_)),
        ));
    }

    #[test]
    fn malformed_constraints_fail_construction() {
        assert!(FieldSpec::text().min(1).build().is_err());
        assert!(FieldSpec::numeric().pattern("a+").build().is_err());
        assert!(FieldSpec::text().pattern("(unclosed").build().is_err());
        assert!(FieldSpec::text().validator(Validator::reject(|_| true, "")).build().is_err());
        assert!(FieldSpec::text().remove_none_values().build().is_err());
    }

    #[test]
    fn numeric_bounds_are_inclusive() {
        let spec = built(FieldSpec::numeric().min(0).max(10));

        assert!(spec.validate(&Value::Int(10), "n").is_ok());
        assert!(spec.validate(&Value::Int(0), "n").is_ok());
        assert!(spec.validate(&Value::Int(11), "n").is_err());
        assert!(spec.validate(&Value::Int(-1), "n").is_err());
        assert!(spec.validate(&Value::Float(10.5), "n").is_err());
    }

    #[test]
    fn choices_reject_values_of_the_right_type() {
        let spec = built(FieldSpec::text().choices(["red", "green"]));

        assert!(spec.validate(&Value::from("red"), "color").is_ok());

        let err = spec.validate(&Value::from("blue"), "color").unwrap_err();
        assert_eq!(err.field, "color");
        assert_eq!(err.message, "value is not within choices");
    }

    #[test]
    fn required_fields_reject_null_and_nullable_fields_skip_the_chain() {
        let required = built(FieldSpec::numeric().required());
        let err = required.validate(&Value::Null, "n2").unwrap_err();
        assert_eq!(err.field, "n2");

        let optional = built(FieldSpec::numeric().validator(Validator::reject(|_| true, "never")));
        assert!(optional.validate(&Value::Null, "n").is_ok());
    }

    #[test]
    fn type_mismatch_reports_observed_type() {
        let spec = built(FieldSpec::boolean());
        let err = spec.validate(&Value::from("yes"), "flag").unwrap_err();

        assert_eq!(err.observed_type, crate::value::ValueType::String);
    }

    #[test]
    fn patterns_are_anchored_at_the_start() {
        let spec = built(FieldSpec::text().pattern("[a-z]+"));

        assert!(spec.validate(&Value::from("abc123"), "slug").is_ok());
        assert!(spec.validate(&Value::from("1abc"), "slug").is_err());
    }

    #[test]
    fn custom_validators_run_after_builtins() {
        let spec = built(
            FieldSpec::text()
                .max_length(3)
                .validator(Validator::reject(|v| v.as_str() == Some("bad"), "bad value"))
                .validator(Validator::check(|value, name| match value.as_str() {
                    Some("no") => Err(FieldValidationError::new(name, value, "no is not allowed")),
                    _ => Ok(()),
                })),
        );

        assert_eq!(spec.validate(&Value::from("bad"), "f").unwrap_err().message, "bad value");
        assert_eq!(spec.validate(&Value::from("no"), "f").unwrap_err().message, "no is not allowed");
        assert!(spec.validate(&Value::from("toolong"), "f").unwrap_err().message.contains("longer"));
    }

    #[test]
    fn tuples_check_arity_and_positions() {
        let spec = built(FieldSpec::tuple([
            built(FieldSpec::text()),
            built(FieldSpec::numeric()),
        ]));

        assert!(spec.validate(&Value::List(vec!["a".into(), 1.into()]), "pair").is_ok());
        assert!(spec.validate(&Value::List(vec!["a".into()]), "pair").is_err());
        assert!(spec.validate(&Value::List(vec![1.into(), 1.into()]), "pair").is_err());
    }

    #[test]
    fn collect_errors_reports_list_elements_by_index() {
        let spec = built(FieldSpec::list(built(FieldSpec::numeric().max(5))));
        let mut report = ValidationReport::new();

        spec.collect_errors(
            &Value::List(vec![1.into(), 9.into(), 3.into(), 7.into()]),
            "scores",
            &mut report,
        );

        assert_eq!(report.paths().collect::<Vec<_>>(), vec!["scores.1", "scores.3"]);
    }

    #[test]
    fn lists_default_to_an_empty_list() {
        let spec = built(FieldSpec::list(built(FieldSpec::text())));
        assert_eq!(spec.default(), &Value::List(Vec::new()));
    }

    #[test]
    fn scalar_values_round_trip_through_storage_and_wire() {
        let cases = vec![
            (built(FieldSpec::object_id()), Value::ObjectId(ObjectId::new())),
            (built(FieldSpec::datetime()), FieldSpec::datetime().build().unwrap().from_native(Value::DateTime(Utc::now()))),
            (built(FieldSpec::boolean()), Value::Bool(true)),
            (built(FieldSpec::numeric()), Value::Int(42)),
            (built(FieldSpec::numeric()), Value::Float(2.5)),
            (built(FieldSpec::text()), Value::from("hello")),
            (built(FieldSpec::map()), Value::Map(json!({ "a": [1, 2], "b": { "c": null } }).as_object().cloned().unwrap())),
            (built(FieldSpec::text()), Value::Null),
        ];

        for (spec, value) in cases {
            assert_eq!(spec.from_storage(&spec.to_storage(&value)).unwrap(), value);
            assert_eq!(spec.from_wire(&spec.to_wire(&value)).unwrap(), value);
        }
    }

    #[test]
    fn references_round_trip_through_storage_and_wire() {
        let id = ObjectId::new();
        let single = built(FieldSpec::reference("simple"));
        let value = single.from_native(Value::ObjectId(id));

        assert_eq!(single.to_storage(&value), Bson::ObjectId(id));
        assert_eq!(single.to_wire(&value), json!(id.to_hex()));
        assert_eq!(single.from_storage(&single.to_storage(&value)).unwrap(), value);

        let any = built(FieldSpec::any_reference());
        let value = Value::Reference(Reference::unresolved(id, "simple:complex_1"));

        assert_eq!(
            any.to_storage(&value),
            Bson::Array(vec![Bson::ObjectId(id), Bson::String("simple:complex_1".into())]),
        );
        assert_eq!(any.to_wire(&value), json!([id.to_hex(), "simple:complex_1"]));
        assert_eq!(any.from_wire(&any.to_wire(&value)).unwrap(), value);
    }

    #[test]
    fn malformed_container_payloads_are_rejected() {
        let list = built(FieldSpec::list(built(FieldSpec::text())));
        assert!(matches!(
            list.from_storage(&Bson::String("nope".into())),
            Err(DocumentStoreError::InvalidDocument(_)),
        ));

        let tuple = built(FieldSpec::tuple([built(FieldSpec::text())]));
        assert!(tuple.from_wire(&json!(["a", "b"])).is_err());
    }

    #[test]
    fn remove_none_values_filters_wire_nulls() {
        let spec = built(FieldSpec::list(built(FieldSpec::text())).remove_none_values());

        assert_eq!(
            spec.from_wire(&json!(["a", null, "b"])).unwrap(),
            Value::List(vec!["a".into(), "b".into()]),
        );
    }

    #[test]
    fn datetimes_accept_epoch_seconds_on_the_wire() {
        let spec = built(FieldSpec::datetime());
        let value = spec.from_wire(&json!(1_700_000_000)).unwrap();

        assert_eq!(value.as_datetime().map(|v| v.timestamp()), Some(1_700_000_000));
    }

    #[test]
    fn numeric_choices_compare_by_value() {
        let spec = built(FieldSpec::numeric().choices([1, 2]));

        assert!(spec.validate(&Value::Float(1.0), "n").is_ok());
        assert!(spec.validate(&spec.from_wire(&json!(2.0)).unwrap(), "n").is_ok());
        assert!(spec.validate(&Value::Float(1.5), "n").is_err());
        assert!(built(FieldSpec::text().choices(["1"])).validate(&Value::Int(1), "s").is_err());
    }

    #[test]
    fn containers_round_trip_through_storage_and_wire() {
        let point = Schema::builder("point")
            .field("x", built(FieldSpec::numeric().required()))
            .field("label", built(FieldSpec::text()))
            .build()
            .unwrap();
        let mut record = Record::new(&point);
        record.set("x", 3).unwrap();
        record.set("label", "origin").unwrap();

        let cases = vec![
            (
                built(FieldSpec::list(built(FieldSpec::numeric()))),
                Value::List(vec![Value::Int(1), Value::Float(2.5)]),
            ),
            (
                built(FieldSpec::tuple([built(FieldSpec::text()), built(FieldSpec::numeric())])),
                Value::List(vec![Value::from("a"), Value::Int(7)]),
            ),
            (built(FieldSpec::nested(&point)), Value::from(record)),
        ];

        for (spec, value) in cases {
            assert!(spec.validate(&value, "field").is_ok());
            assert_eq!(spec.from_storage(&spec.to_storage(&value)).unwrap(), value);
            assert_eq!(spec.from_wire(&spec.to_wire(&value)).unwrap(), value);
        }

        let nested = built(FieldSpec::nested(&point));
        assert_eq!(nested.to_storage(&Value::Null), Bson::Null);
        assert_eq!(nested.from_storage(&Bson::Null).unwrap(), Value::Null);
    }

    #[test]
    fn wire_output_is_idempotent() {
        let spec = built(FieldSpec::list(built(FieldSpec::datetime())));
        let value = spec.from_native(Value::List(vec![Value::DateTime(Utc::now())]));

        let once = spec.to_wire(&value);
        assert_eq!(spec.to_wire(&value), once);
        assert_eq!(spec.to_wire(&spec.from_wire(&once).unwrap()), once);
    }
}
