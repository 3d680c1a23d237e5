//! Schemas: ordered field tables with inheritance and collection bindings.
//!
//! A [`Schema`] is built once through [`SchemaBuilder`] and shared as `Arc<Schema>`.
//! Inheritance merges the parent's field table into the child's, parent first. A field
//! redeclared by the child replaces the parent's entry at the same position.
//!
//! Document schemas carry an `id` identity field stored under `_id`, may be bound to a
//! collection key and are registered with a [`Registry`](crate::registry::Registry).
//! Collection keys of the form `"collection:sub"` bind a subtype that shares its base's
//! physical collection; the stored `_subtype` key tells the two apart.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult, ValidationReport},
    field::FieldSpec,
    query::IndexSpec,
    record::Record,
};

/// Storage key holding a document's subtype discriminator.
pub const SUBTYPE_KEY: &str = "_subtype";
/// Name of the identity field of document schemas.
pub const ID_FIELD: &str = "id";
/// Storage key of the identity field.
pub const ID_KEY: &str = "_id";
/// Connection used when a schema names none.
pub const DEFAULT_CONNECTION: &str = "default";

/// A parsed collection key: a physical collection plus an optional subtype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionKey {
    collection: String,
    subtype: Option<String>,
}

impl CollectionKey {
    /// Parses `"collection"` or `"collection:subtype"`. Only the first `:` separates the
    /// parts, so nested subtypes keep their full suffix.
    pub fn parse(key: &str) -> DocumentStoreResult<Self> {
        let (collection, subtype) = match key.split_once(':') {
            Some((collection, subtype)) => (collection, Some(subtype)),
            None => (key, None),
        };

        if collection.is_empty() || subtype.is_some_and(str::is_empty) {
            return Err(DocumentStoreError::Definition(format!(
                "'{key}' is not a valid collection key"
            )));
        }

        Ok(Self {
            collection: collection.to_string(),
            subtype: subtype.map(str::to_string),
        })
    }

    /// The physical collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn subtype(&self) -> Option<&str> {
        self.subtype.as_deref()
    }

    pub fn is_subtype(&self) -> bool {
        self.subtype.is_some()
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subtype {
            Some(subtype) => write!(f, "{}:{subtype}", self.collection),
            None => f.write_str(&self.collection),
        }
    }
}

/// One entry of a schema's merged field table.
#[derive(Debug, Clone)]
pub struct SchemaField {
    name: String,
    key: String,
    spec: Arc<FieldSpec>,
}

impl SchemaField {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage and wire key.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn spec(&self) -> &FieldSpec {
        &self.spec
    }
}

/// Declares that deleting documents of `source` deletes the documents of this schema
/// whose `field` references them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeRule {
    pub source: String,
    pub field: String,
}

type SchemaValidatorFn = Arc<dyn Fn(&Record, &mut ValidationReport) + Send + Sync>;

/// A whole-record validator, run after every field passed.
#[derive(Clone)]
pub struct SchemaValidator(SchemaValidatorFn);

impl SchemaValidator {
    pub(crate) fn run(&self, record: &Record, report: &mut ValidationReport) {
        (self.0)(record, report)
    }
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SchemaValidator(..)")
    }
}

/// An immutable, merged record schema.
#[derive(Debug)]
pub struct Schema {
    name: String,
    parent: Option<Arc<Schema>>,
    document: bool,
    fields: Vec<SchemaField>,
    by_name: HashMap<String, usize>,
    by_key: HashMap<String, usize>,
    collection: Option<CollectionKey>,
    connection: String,
    indexes: Vec<IndexSpec>,
    cascades: Vec<CascadeRule>,
    strict: bool,
    validators: Vec<SchemaValidator>,
}

impl Schema {
    /// Starts an embedded (non-document) schema.
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name.into(), false)
    }

    /// Starts a document schema, which carries an identity field.
    pub fn document(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name.into(), true)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<Schema>> {
        self.parent.as_ref()
    }

    pub fn is_document(&self) -> bool {
        self.document
    }

    /// The merged field table in declaration order, parent fields first.
    pub fn fields(&self) -> &[SchemaField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.by_name.get(name).map(|&index| &self.fields[index])
    }

    pub fn field_by_key(&self, key: &str) -> Option<&SchemaField> {
        self.by_key.get(key).map(|&index| &self.fields[index])
    }

    pub fn collection(&self) -> Option<&CollectionKey> {
        self.collection.as_ref()
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    /// Indexes declared by this schema itself.
    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    /// Cascade rules declared by this schema itself.
    pub fn cascades(&self) -> &[CascadeRule] {
        &self.cascades
    }

    /// Strict schemas reject undeclared storage keys instead of ignoring them.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub(crate) fn validators(&self) -> &[SchemaValidator] {
        &self.validators
    }

    /// Whether this schema is `other` or inherits from it.
    pub fn is_subtype_of(&self, other: &Schema) -> bool {
        let mut current = Some(self);

        while let Some(schema) = current {
            if std::ptr::eq(schema, other) {
                return true;
            }
            current = schema.parent.as_deref();
        }

        false
    }
}

/// Builder for [`Schema`].
#[derive(Debug)]
pub struct SchemaBuilder {
    name: String,
    document: bool,
    parent: Option<Arc<Schema>>,
    fields: Vec<(String, FieldSpec)>,
    collection: Option<String>,
    connection: Option<String>,
    indexes: Vec<IndexSpec>,
    cascades: Vec<CascadeRule>,
    strict: Option<bool>,
    validators: Vec<SchemaValidator>,
}

impl SchemaBuilder {
    fn new(name: String, document: bool) -> Self {
        Self {
            name,
            document,
            parent: None,
            fields: Vec::new(),
            collection: None,
            connection: None,
            indexes: Vec::new(),
            cascades: Vec::new(),
            strict: None,
            validators: Vec::new(),
        }
    }

    pub fn extends(mut self, parent: &Arc<Schema>) -> Self {
        self.parent = Some(Arc::clone(parent));
        self
    }

    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.push((name.into(), spec));
        self
    }

    /// Binds the schema to a collection key. A key starting with `:` extends the
    /// parent's collection key, so `":complex"` under `"simple"` binds `"simple:complex"`.
    pub fn collection(mut self, key: impl Into<String>) -> Self {
        self.collection = Some(key.into());
        self
    }

    pub fn connection(mut self, name: impl Into<String>) -> Self {
        self.connection = Some(name.into());
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Deletes documents of this schema whose `field` references a deleted document of
    /// collection `source`.
    pub fn cascade_from(mut self, source: impl Into<String>, field: impl Into<String>) -> Self {
        self.cascades.push(CascadeRule {
            source: source.into(),
            field: field.into(),
        });
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Record, &mut ValidationReport) + Send + Sync + 'static,
    {
        self.validators.push(SchemaValidator(Arc::new(validator)));
        self
    }

    /// Merges the field table and resolves inherited settings.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Definition`] for empty or dotted field names, two
    /// fields sharing a storage key, a field using the reserved `_subtype` key, a
    /// collection on an embedded schema, or a `:sub` key without a parent collection.
    pub fn build(self) -> DocumentStoreResult<Arc<Schema>> {
        let name = self.name;
        let parent = self.parent;
        let document = self.document || parent.as_ref().is_some_and(|p| p.document);

        let mut fields: Vec<SchemaField> = parent
            .as_ref()
            .map(|p| p.fields.clone())
            .unwrap_or_default();

        if document && !fields.iter().any(|field| field.name == ID_FIELD) {
            let identity = FieldSpec::object_id().required().key(ID_KEY).build()?;
            fields.insert(
                0,
                SchemaField {
                    name: ID_FIELD.to_string(),
                    key: ID_KEY.to_string(),
                    spec: Arc::new(identity),
                },
            );
        }

        let mut declared = std::collections::HashSet::new();
        for (field_name, spec) in self.fields {
            if field_name.is_empty() || field_name.contains('.') {
                return Err(DocumentStoreError::Definition(format!(
                    "'{field_name}' is not a valid field name on schema '{name}'"
                )));
            }
            if !declared.insert(field_name.clone()) {
                return Err(DocumentStoreError::Definition(format!(
                    "field '{field_name}' is declared twice on schema '{name}'"
                )));
            }

            match fields.iter_mut().find(|field| field.name == field_name) {
                Some(existing) => {
                    existing.key = spec.key().map(str::to_string).unwrap_or_else(|| existing.key.clone());
                    existing.spec = Arc::new(spec);
                }
                None => fields.push(SchemaField {
                    key: spec.key().unwrap_or(&field_name).to_string(),
                    name: field_name,
                    spec: Arc::new(spec),
                }),
            }
        }

        let mut by_name = HashMap::with_capacity(fields.len());
        let mut by_key = HashMap::with_capacity(fields.len());
        for (index, field) in fields.iter().enumerate() {
            if field.key == SUBTYPE_KEY {
                return Err(DocumentStoreError::Definition(format!(
                    "'{SUBTYPE_KEY}' is reserved and cannot be used by field '{}'",
                    field.name
                )));
            }
            if by_key.insert(field.key.clone(), index).is_some() {
                return Err(DocumentStoreError::Definition(format!(
                    "storage key '{}' is used twice on schema '{name}'",
                    field.key
                )));
            }
            by_name.insert(field.name.clone(), index);
        }

        let collection = match self.collection {
            Some(_) if !document => {
                return Err(DocumentStoreError::Definition(format!(
                    "embedded schema '{name}' cannot bind a collection"
                )));
            }
            Some(key) if key.starts_with(':') => {
                let base = parent
                    .as_ref()
                    .and_then(|p| p.collection.as_ref())
                    .ok_or_else(|| {
                        DocumentStoreError::Definition(format!(
                            "'{name}' extends a collection key but its parent binds none"
                        ))
                    })?;
                Some(CollectionKey::parse(&format!("{base}{key}"))?)
            }
            Some(key) => Some(CollectionKey::parse(&key)?),
            None => parent.as_ref().and_then(|p| p.collection.clone()),
        };

        let connection = self
            .connection
            .or_else(|| parent.as_ref().map(|p| p.connection.clone()))
            .unwrap_or_else(|| DEFAULT_CONNECTION.to_string());
        let strict = self
            .strict
            .or_else(|| parent.as_ref().map(|p| p.strict))
            .unwrap_or(false);

        let mut validators = parent
            .as_ref()
            .map(|p| p.validators.clone())
            .unwrap_or_default();
        validators.extend(self.validators);

        Ok(Arc::new(Schema {
            name,
            parent,
            document,
            fields,
            by_name,
            by_key,
            collection,
            connection,
            indexes: self.indexes,
            cascades: self.cascades,
            strict,
            validators,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text() -> FieldSpec {
        FieldSpec::text().build().expect("valid field spec")
    }

    #[test]
    fn collection_keys_split_at_the_first_colon() {
        let key = CollectionKey::parse("simple:complex:deeper").unwrap();

        assert_eq!(key.collection(), "simple");
        assert_eq!(key.subtype(), Some("complex:deeper"));
        assert_eq!(key.to_string(), "simple:complex:deeper");
        assert!(CollectionKey::parse(":orphan").is_err());
        assert!(CollectionKey::parse("simple:").is_err());
    }

    #[test]
    fn document_schemas_get_an_identity_field_first() {
        let schema = Schema::document("simple").field("name", text()).build().unwrap();

        let names: Vec<_> = schema.fields().iter().map(SchemaField::name).collect();
        assert_eq!(names, vec!["id", "name"]);
        assert_eq!(schema.field("id").map(SchemaField::key), Some("_id"));
        assert!(schema.field("id").unwrap().spec().is_required());
    }

    #[test]
    fn overrides_keep_the_parent_position_and_key() {
        let parent = Schema::builder("base")
            .field("a", text())
            .field("b", FieldSpec::text().key("bee").build().unwrap())
            .build()
            .unwrap();
        let child = Schema::builder("child")
            .extends(&parent)
            .field("c", text())
            .field("b", FieldSpec::text().max_length(3).build().unwrap())
            .build()
            .unwrap();

        let names: Vec<_> = child.fields().iter().map(SchemaField::name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(child.field("b").map(SchemaField::key), Some("bee"));
        assert!(child.is_subtype_of(&parent));
        assert!(!parent.is_subtype_of(&child));
    }

    #[test]
    fn subtype_keys_extend_the_parent_collection() {
        let simple = Schema::document("simple").collection("simple").build().unwrap();
        let complex = Schema::document("complex")
            .extends(&simple)
            .collection(":complex")
            .build()
            .unwrap();
        let inherited = Schema::document("inherited").extends(&complex).build().unwrap();

        assert_eq!(complex.collection().map(ToString::to_string).as_deref(), Some("simple:complex"));
        assert_eq!(inherited.collection(), complex.collection());
        assert_eq!(complex.connection(), DEFAULT_CONNECTION);
    }

    #[test]
    fn malformed_schemas_fail_to_build() {
        assert!(Schema::document("orphan").collection(":sub").build().is_err());
        assert!(Schema::builder("embedded").collection("things").build().is_err());
        assert!(
            Schema::builder("clash")
                .field("a", FieldSpec::text().key("k").build().unwrap())
                .field("b", FieldSpec::text().key("k").build().unwrap())
                .build()
                .is_err()
        );
        assert!(
            Schema::builder("reserved")
                .field("kind", FieldSpec::text().key(SUBTYPE_KEY).build().unwrap())
                .build()
                .is_err()
        );
        assert!(Schema::builder("dotted").field("a.b", text()).build().is_err());
    }
}
