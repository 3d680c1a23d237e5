//! The registry: named connections, registered collections and cascade triggers.
//!
//! Registration happens once, through a [`RegistryBuilder`], before any document
//! operation. The built [`Registry`] is read-only and is passed by reference to every
//! operation that needs to reach a collection.
//!
//! # Examples
//!
//! ```ignore
//! use docspec::prelude::*;
//! use docspec::memory::InMemoryStore;
//!
//! let registry = Registry::builder()
//!     .connection("default", InMemoryStore::new())
//!     .register(&simple)?
//!     .register(&complex)?
//!     .build()
//!     .await?;
//!
//! let count = registry.count("simple", &Filter::all()).await?;
//! ```

use std::{collections::HashMap, sync::Arc};

use bson::{oid::ObjectId, Bson, Document as RawDocument};
use tracing::info;

use crate::{
    backend::{SharedStoreBackend, StoreBackend},
    cursor::Cursor,
    document::Document,
    error::{DocumentStoreError, DocumentStoreResult},
    manager::CollectionManager,
    query::{Expr, Query, Update},
    schema::{CollectionKey, Schema, SUBTYPE_KEY},
};

/// Deletes documents of `dependent` whose `field` (a storage key) references a deleted
/// source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeTrigger {
    pub dependent: String,
    pub field: String,
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    connections: HashMap<String, SharedStoreBackend>,
    managers: Vec<CollectionManager>,
    triggers: HashMap<String, Vec<CascadeTrigger>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a named connection.
    pub fn connection(self, name: impl Into<String>, backend: impl StoreBackend + 'static) -> Self {
        self.shared_connection(name, Arc::new(backend))
    }

    /// Adds a named connection backed by an already shared handle.
    pub fn shared_connection(mut self, name: impl Into<String>, backend: SharedStoreBackend) -> Self {
        self.connections.insert(name.into(), backend);
        self
    }

    fn find(&self, key: &str) -> Option<&CollectionManager> {
        self.managers
            .iter()
            .find(|manager| manager.key().to_string() == key)
    }

    /// Registers a document schema under its collection key.
    ///
    /// A subtype key (`"base:sub"`) requires the base key to be registered first and the
    /// schema to inherit from the base schema.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::Definition`] when the schema binds no collection, names an
    /// unknown connection, reuses a registered key, has no registered base, or declares
    /// a cascade on an undeclared field.
    pub fn register(mut self, schema: &Arc<Schema>) -> DocumentStoreResult<Self> {
        let key = schema.collection().cloned().ok_or_else(|| {
            DocumentStoreError::Definition(format!("schema '{}' binds no collection", schema.name()))
        })?;
        let key_name = key.to_string();

        if self.find(&key_name).is_some() {
            return Err(DocumentStoreError::Definition(format!(
                "collection key '{key_name}' is already registered"
            )));
        }

        let backend = self
            .connections
            .get(schema.connection())
            .cloned()
            .ok_or_else(|| {
                DocumentStoreError::Definition(format!(
                    "schema '{}' uses unknown connection '{}'",
                    schema.name(),
                    schema.connection()
                ))
            })?;

        if key.is_subtype() {
            let base = self.find(key.collection()).ok_or_else(|| {
                DocumentStoreError::Definition(format!(
                    "base collection '{}' must be registered before '{key_name}'",
                    key.collection()
                ))
            })?;

            if !schema.is_subtype_of(base.schema()) {
                return Err(DocumentStoreError::Definition(format!(
                    "schema '{}' does not inherit from '{}'",
                    schema.name(),
                    base.schema().name()
                )));
            }
        }

        for rule in schema.cascades() {
            let field = schema.field(&rule.field).ok_or_else(|| DocumentStoreError::UnknownField {
                schema: schema.name().to_string(),
                field: rule.field.clone(),
            })?;
            let source = CollectionKey::parse(&rule.source)?;

            self.triggers
                .entry(source.collection().to_string())
                .or_default()
                .push(CascadeTrigger {
                    dependent: key_name.clone(),
                    field: field.key().to_string(),
                });
            info!(source = %source, dependent = key_name.as_str(), field = field.key(), "registered cascade");
        }

        info!(schema = schema.name(), collection = key_name.as_str(), connection = schema.connection(), "registered collection");
        self.managers.push(CollectionManager::new(key, Arc::clone(schema), backend));

        Ok(self)
    }

    /// Creates the declared indexes and returns the registry.
    pub async fn build(self) -> DocumentStoreResult<Registry> {
        for manager in &self.managers {
            for index in manager.schema().indexes() {
                let name = manager.create_index(index).await?;
                info!(collection = manager.collection(), index = name.as_str(), "ensured index");
            }
        }

        let managers = self
            .managers
            .into_iter()
            .map(|manager| (manager.key().to_string(), manager))
            .collect();

        Ok(Registry {
            connections: self.connections,
            managers,
            triggers: self.triggers,
        })
    }
}

#[derive(Debug)]
pub struct Registry {
    connections: HashMap<String, SharedStoreBackend>,
    managers: HashMap<String, CollectionManager>,
    triggers: HashMap<String, Vec<CascadeTrigger>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn connection(&self, name: &str) -> DocumentStoreResult<&SharedStoreBackend> {
        self.connections
            .get(name)
            .ok_or_else(|| DocumentStoreError::Definition(format!("unknown connection '{name}'")))
    }

    pub fn manager(&self, key: &str) -> DocumentStoreResult<&CollectionManager> {
        self.managers
            .get(key)
            .ok_or_else(|| DocumentStoreError::CollectionNotFound(key.to_string()))
    }

    /// The manager of the collection `schema` is bound to.
    pub fn manager_for(&self, schema: &Schema) -> DocumentStoreResult<&CollectionManager> {
        let key = schema.collection().ok_or_else(|| {
            DocumentStoreError::Definition(format!("schema '{}' binds no collection", schema.name()))
        })?;
        self.manager(&key.to_string())
    }

    pub fn schema(&self, key: &str) -> DocumentStoreResult<&Arc<Schema>> {
        self.manager(key).map(CollectionManager::schema)
    }

    /// Registered collection keys, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.managers.keys().map(String::as_str)
    }

    /// Cascade triggers fired by deletes on the physical `collection`.
    pub fn triggers(&self, collection: &str) -> &[CascadeTrigger] {
        self.triggers.get(collection).map(Vec::as_slice).unwrap_or_default()
    }

    /// The schema a stored document of the physical `collection` belongs to, chosen by
    /// its `_subtype` discriminator.
    pub fn classify(&self, collection: &str, raw: &RawDocument) -> DocumentStoreResult<&Arc<Schema>> {
        let key = match raw.get(SUBTYPE_KEY) {
            None | Some(Bson::Null) => collection.to_string(),
            Some(Bson::String(subtype)) => format!("{collection}:{subtype}"),
            Some(other) => {
                return Err(DocumentStoreError::InvalidDocument(format!(
                    "'{SUBTYPE_KEY}' must be a string, found {:?}",
                    other.element_type()
                )));
            }
        };

        self.managers
            .get(&key)
            .map(CollectionManager::schema)
            .ok_or_else(|| DocumentStoreError::Definition(format!("unknown document type '{key}'")))
    }

    /// Inflates a stored document of the physical `collection` into its registered schema.
    pub fn inflate(&self, collection: &str, raw: &RawDocument) -> DocumentStoreResult<Document> {
        Document::from_storage(self.classify(collection, raw)?, raw)
    }

    /// A new document of `key` when `id` is `None`, else the stored document `id`.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::DocumentNotFound`] when no document has that identity.
    pub async fn factory(&self, key: &str, id: Option<ObjectId>) -> DocumentStoreResult<Document> {
        let manager = self.manager(key)?;

        match id {
            None => Document::new(manager.schema()),
            Some(id) => {
                let raw = manager
                    .find_one(id)
                    .await?
                    .ok_or_else(|| DocumentStoreError::DocumentNotFound(id.to_hex(), key.to_string()))?;
                self.inflate(manager.collection(), &raw)
            }
        }
    }

    pub fn find(&self, key: &str, query: Query) -> DocumentStoreResult<Cursor<'_>> {
        Ok(self.manager(key)?.find(self, query))
    }

    pub async fn count(&self, key: &str, filter: &Expr) -> DocumentStoreResult<u64> {
        self.manager(key)?.count(filter).await
    }

    pub async fn delete(&self, key: &str, filter: Expr) -> DocumentStoreResult<u64> {
        self.manager(key)?.delete(self, filter).await
    }

    pub async fn update(&self, key: &str, filter: &Expr, update: &Update) -> DocumentStoreResult<u64> {
        self.manager(key)?.update(filter, update).await
    }
}
