//! Top-level documents: records with an identity bound to a collection.

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use bson::{oid::ObjectId, Bson, Document as RawDocument};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{
    error::{DocumentStoreError, DocumentStoreResult, ValidationReport},
    query::Filter,
    record::Record,
    registry::Registry,
    schema::{Schema, ID_FIELD, ID_KEY},
    value::{JsonMap, Value},
};

/// Whether a document has been written to its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    /// Carries the identity generated at construction and was never saved.
    New,
    /// Was loaded from the store, saved, or had its identity assigned explicitly.
    Persisted,
}

/// A record of a document schema.
///
/// Dereferences to [`Record`] for field access.
///
/// # Examples
///
/// ```ignore
/// let mut user = Document::new(&user_schema)?;
/// user.set("name", "Ada")?;
/// user.save(&registry).await?;
///
/// let loaded = Document::load(&registry, &user_schema, user.id().unwrap()).await?;
/// assert_eq!(loaded, user);
/// ```
#[derive(Debug, Clone)]
pub struct Document {
    record: Record,
    injected_id: Option<ObjectId>,
    report: Option<ValidationReport>,
}

impl Document {
    /// Creates a new document with a freshly generated identity.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::Definition`] when `schema` is not a document schema.
    pub fn new(schema: &Arc<Schema>) -> DocumentStoreResult<Self> {
        ensure_document(schema)?;

        let id = ObjectId::new();
        let mut record = Record::new(schema);
        record.insert_unchecked(ID_FIELD, Value::ObjectId(id));

        Ok(Self {
            record,
            injected_id: Some(id),
            report: None,
        })
    }

    /// Builds a persisted document from its storage representation.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::InvalidDocument`] when the stored document carries no
    /// identity, plus anything [`Record::from_storage`] reports.
    pub fn from_storage(schema: &Arc<Schema>, raw: &RawDocument) -> DocumentStoreResult<Self> {
        ensure_document(schema)?;

        match raw.get(ID_KEY) {
            Some(Bson::ObjectId(_)) => {}
            _ => {
                return Err(DocumentStoreError::InvalidDocument(format!(
                    "stored '{}' document carries no identity",
                    schema.name()
                )));
            }
        }

        Ok(Self {
            record: Record::from_storage(schema, raw)?,
            injected_id: None,
            report: None,
        })
    }

    /// Builds a new document from a wire payload. The payload's `_id`, when present,
    /// replaces the generated identity.
    pub fn from_wire(schema: &Arc<Schema>, wire: &JsonMap) -> DocumentStoreResult<Self> {
        let mut document = Self::new(schema)?;
        document.record.apply_wire(wire)?;
        Ok(document)
    }

    /// Loads the document with identity `id` from the collection `schema` is bound to.
    ///
    /// The stored document's `_subtype` decides which registered schema inflates it, so
    /// loading through a base schema can return a subtype document.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::DocumentNotFound`] when no such document exists.
    pub async fn load(registry: &Registry, schema: &Arc<Schema>, id: ObjectId) -> DocumentStoreResult<Self> {
        let manager = registry.manager_for(schema)?;

        let raw = manager
            .find_one(id)
            .await?
            .ok_or_else(|| DocumentStoreError::DocumentNotFound(id.to_hex(), manager.key().to_string()))?;

        registry.inflate(manager.collection(), &raw)
    }

    pub fn id(&self) -> Option<ObjectId> {
        self.record.value(ID_FIELD).ok().and_then(Value::as_object_id)
    }

    /// Sets the identity explicitly. The document is no longer considered new.
    pub fn set_id(&mut self, id: ObjectId) -> DocumentStoreResult<()> {
        self.record.set(ID_FIELD, id)
    }

    /// Whether the document still carries its generated identity and was never saved.
    pub fn is_new(&self) -> bool {
        self.injected_id.is_some() && self.id() == self.injected_id
    }

    pub fn state(&self) -> DocumentState {
        match self.is_new() {
            true => DocumentState::New,
            false => DocumentState::Persisted,
        }
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn into_record(self) -> Record {
        self.record
    }

    /// Validates and writes the document to its collection.
    ///
    /// # Errors
    ///
    /// Validation errors leave the store untouched.
    pub async fn save(&mut self, registry: &Registry) -> DocumentStoreResult<ObjectId> {
        self.record.validate()?;

        let manager = registry.manager_for(self.record.schema())?;
        let id = manager.write(self.record.to_storage(), None).await?;

        self.record.insert_unchecked(ID_FIELD, Value::ObjectId(id));
        self.injected_id = None;
        debug!(collection = %manager.key(), id = %id, "saved document");

        Ok(id)
    }

    /// Deletes this document, firing any cascade rules on its collection.
    pub async fn delete(&self, registry: &Registry) -> DocumentStoreResult<u64> {
        let id = self
            .id()
            .ok_or_else(|| DocumentStoreError::InvalidIdentity("document has no identity".to_string()))?;

        registry
            .manager_for(self.record.schema())?
            .delete(registry, Filter::id(id))
            .await
    }

    /// Collects every validation failure into a report kept on the document and
    /// included in its wire output under `errors`.
    ///
    /// # Errors
    ///
    /// When `throw` is set, a non-empty report is returned as
    /// [`DocumentStoreError::DocumentValidation`].
    pub fn validate_with_report(&mut self, throw: bool) -> DocumentStoreResult<&ValidationReport> {
        let report = self.record.collect_errors();

        if throw && !report.is_empty() {
            return Err(DocumentStoreError::DocumentValidation(report));
        }

        Ok(self.report.insert(report))
    }

    pub fn validation_report(&self) -> Option<&ValidationReport> {
        self.report.as_ref()
    }

    pub fn to_wire(&self) -> JsonMap {
        let mut wire = self.record.to_wire();

        if let Some(report) = &self.report {
            wire.insert(
                "errors".to_string(),
                serde_json::to_value(report).unwrap_or(JsonValue::Null),
            );
        }

        wire
    }
}

fn ensure_document(schema: &Schema) -> DocumentStoreResult<()> {
    match schema.is_document() {
        true => Ok(()),
        false => Err(DocumentStoreError::Definition(format!(
            "'{}' is not a document schema",
            schema.name()
        ))),
    }
}

impl Deref for Document {
    type Target = Record;

    fn deref(&self) -> &Record {
        &self.record
    }
}

impl DerefMut for Document {
    fn deref_mut(&mut self) -> &mut Record {
        &mut self.record
    }
}

/// Documents are equal when they share an identity and one's schema inherits from the
/// other's.
impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        match (self.id(), other.id()) {
            (Some(left), Some(right)) => {
                left == right
                    && (self.schema().is_subtype_of(other.schema())
                        || other.schema().is_subtype_of(self.schema()))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldSpec;
    use bson::doc;
    use serde_json::json;

    fn simple() -> Arc<Schema> {
        Schema::document("simple")
            .collection("simple")
            .field("name", FieldSpec::text().required().build().unwrap())
            .field("score", FieldSpec::numeric().max(10).build().unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn new_documents_carry_a_generated_identity() {
        let mut document = Document::new(&simple()).unwrap();

        assert!(document.id().is_some());
        assert_eq!(document.state(), DocumentState::New);

        document.set_id(ObjectId::new()).unwrap();
        assert_eq!(document.state(), DocumentState::Persisted);
    }

    #[test]
    fn embedded_schemas_cannot_back_documents() {
        let embedded = Schema::builder("part").build().unwrap();
        assert!(matches!(Document::new(&embedded), Err(DocumentStoreError::Definition(_))));
    }

    #[test]
    fn stored_documents_require_an_identity() {
        let schema = simple();
        assert!(Document::from_storage(&schema, &doc! { "name": "x" }).is_err());

        let id = ObjectId::new();
        let document = Document::from_storage(&schema, &doc! { "_id": id, "name": "x" }).unwrap();
        assert_eq!(document.id(), Some(id));
        assert!(!document.is_new());
    }

    #[test]
    fn equality_follows_identity_and_lineage() {
        let base = simple();
        let child = Schema::document("child").extends(&base).collection(":child").build().unwrap();
        let other = Schema::document("other").collection("other").build().unwrap();
        let id = ObjectId::new();

        let mut left = Document::new(&base).unwrap();
        let mut right = Document::new(&child).unwrap();
        let mut unrelated = Document::new(&other).unwrap();
        left.set_id(id).unwrap();
        right.set_id(id).unwrap();
        unrelated.set_id(id).unwrap();

        assert_eq!(left, right);
        assert_ne!(left, unrelated);
    }

    #[test]
    fn reports_appear_on_the_wire() {
        let mut document = Document::new(&simple()).unwrap();
        document.insert_unchecked("score", Value::Int(20));

        let report = document.validate_with_report(false).unwrap();
        assert_eq!(report.len(), 2);

        let wire = document.to_wire();
        assert_eq!(wire.get("errors").and_then(|e| e.get("score")), Some(&json!(["must be at most 10"])));
        assert!(document.validate_with_report(true).is_err());
    }
}
