//! In-memory storage implementation of [`StoreBackend`].
//!
//! Documents are kept as BSON documents in ordered maps keyed by identity, behind an
//! async-aware read-write lock.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use bson::{oid::ObjectId, Document};
use mea::rwlock::RwLock;
use tracing::debug;

use docspec_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    error::DocumentStoreResult,
    query::{Expr, IndexSpec, Query, SortDirection, Update},
};

use crate::evaluator::{apply_update, sort_key, DocumentEvaluator};

type CollectionMap = BTreeMap<ObjectId, Document>;
type StoreMap = HashMap<String, CollectionMap>;

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses `Arc`-wrapped internal state; clones share the
/// same data. Queries scan every document of a collection. Without sort keys, results
/// come back in identity order, which for generated identities is creation order.
///
/// # Example
///
/// ```ignore
/// use docspec_memory::InMemoryStore;
/// use docspec::backend::StoreBackend;
/// use bson::{doc, oid::ObjectId};
///
/// let store = InMemoryStore::new();
/// let id = ObjectId::new();
/// store.upsert(id, doc! { "name": "Alice" }, "users").await?;
///
/// assert!(store.find_one(id, "users").await?.is_some());
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> (document id -> document)
    store: Arc<RwLock<StoreMap>>,
    /// collection name -> created index names
    indexes: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder
    }

    /// Names of the indexes created on `collection`, in creation order.
    pub async fn index_names(&self, collection: &str) -> Vec<String> {
        self.indexes
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Names of the collections holding at least one document.
    pub async fn list_collections(&self) -> Vec<String> {
        self.store
            .read()
            .await
            .iter()
            .filter(|(_, documents)| !documents.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

fn matching<'a>(
    documents: &'a CollectionMap,
    filter: &'a Expr,
) -> impl Iterator<Item = (&'a ObjectId, &'a Document)> + 'a {
    documents.iter().filter(move |(_, document)| {
        filter.is_all() || DocumentEvaluator::new(document).evaluate(filter).unwrap_or(false)
    })
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn find_one(&self, id: ObjectId, collection: &str) -> DocumentStoreResult<Option<Document>> {
        Ok(self
            .store
            .read()
            .await
            .get(collection)
            .and_then(|documents| documents.get(&id))
            .cloned())
    }

    async fn find(&self, query: Query, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        let store = self.store.read().await;
        let Some(documents) = store.get(collection) else {
            return Ok(Vec::new());
        };

        let mut found: Vec<&Document> = matching(documents, &query.filter)
            .map(|(_, document)| document)
            .collect();

        if !query.sort.is_empty() {
            found.sort_by(|a, b| {
                for sort in &query.sort {
                    let ordering = sort_key(a, &sort.field).sort_cmp(&sort_key(b, &sort.field));
                    let ordering = match sort.direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        Ok(found
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn find_ids(&self, filter: &Expr, collection: &str) -> DocumentStoreResult<Vec<ObjectId>> {
        let store = self.store.read().await;

        Ok(store
            .get(collection)
            .map(|documents| matching(documents, filter).map(|(id, _)| *id).collect())
            .unwrap_or_default())
    }

    async fn count(&self, filter: &Expr, collection: &str) -> DocumentStoreResult<u64> {
        let store = self.store.read().await;

        Ok(store
            .get(collection)
            .map(|documents| matching(documents, filter).count() as u64)
            .unwrap_or(0))
    }

    async fn upsert(&self, id: ObjectId, mut document: Document, collection: &str) -> DocumentStoreResult<ObjectId> {
        document.insert("_id", id);

        self.store
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id, document);

        Ok(id)
    }

    async fn delete_many(&self, filter: &Expr, collection: &str) -> DocumentStoreResult<u64> {
        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(0);
        };

        let doomed: Vec<ObjectId> = matching(documents, filter).map(|(id, _)| *id).collect();
        for id in &doomed {
            documents.remove(id);
        }

        debug!(collection, deleted = doomed.len(), "deleted documents");
        Ok(doomed.len() as u64)
    }

    async fn update_many(&self, filter: &Expr, update: &Update, collection: &str) -> DocumentStoreResult<u64> {
        let mut store = self.store.write().await;
        let Some(documents) = store.get_mut(collection) else {
            return Ok(0);
        };

        let targets: Vec<ObjectId> = matching(documents, filter).map(|(id, _)| *id).collect();
        let mut modified = 0;

        for id in targets {
            if let Some(document) = documents.get_mut(&id) {
                if apply_update(document, update.ops())? {
                    modified += 1;
                }
                document.insert("_id", id);
            }
        }

        Ok(modified)
    }

    async fn create_index(&self, index: &IndexSpec, collection: &str) -> DocumentStoreResult<String> {
        let name = index.index_name();
        let mut indexes = self.indexes.write().await;
        let names = indexes.entry(collection.to_string()).or_default();

        if !names.contains(&name) {
            names.push(name.clone());
        }

        Ok(name)
    }
}

/// Builder for [`InMemoryStore`].
#[derive(Debug, Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}
