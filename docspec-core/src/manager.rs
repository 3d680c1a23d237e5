//! Per-collection managers: the store operations behind one registered schema.

use std::{collections::HashSet, sync::Arc};

use bson::{oid::ObjectId, Bson, Document as RawDocument};
use futures::future::{BoxFuture, FutureExt};
use tracing::debug;

use crate::{
    backend::SharedStoreBackend,
    cursor::Cursor,
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, Filter, IndexSpec, Query, Update},
    registry::Registry,
    schema::{CollectionKey, Schema, ID_KEY, SUBTYPE_KEY},
};

/// Runs store operations for one collection key.
///
/// Base and subtype managers share the physical collection; writes through a subtype
/// manager stamp the stored document with its `_subtype` discriminator.
#[derive(Debug, Clone)]
pub struct CollectionManager {
    key: CollectionKey,
    schema: Arc<Schema>,
    backend: SharedStoreBackend,
}

impl CollectionManager {
    pub(crate) fn new(key: CollectionKey, schema: Arc<Schema>, backend: SharedStoreBackend) -> Self {
        Self { key, schema, backend }
    }

    pub fn key(&self) -> &CollectionKey {
        &self.key
    }

    /// The physical collection.
    pub fn collection(&self) -> &str {
        self.key.collection()
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn backend(&self) -> &SharedStoreBackend {
        &self.backend
    }

    pub async fn find_one(&self, id: ObjectId) -> DocumentStoreResult<Option<RawDocument>> {
        self.backend.find_one(id, self.collection()).await
    }

    /// Upserts a stored document.
    ///
    /// The identity is `id` when given, else the document's `_id`, else a fresh one.
    pub async fn write(&self, mut document: RawDocument, id: Option<ObjectId>) -> DocumentStoreResult<ObjectId> {
        let id = match (id, document.get(ID_KEY)) {
            (Some(id), _) => id,
            (None, Some(Bson::ObjectId(id))) => *id,
            (None, _) => ObjectId::new(),
        };
        document.insert(ID_KEY, id);

        if let Some(subtype) = self.key.subtype() {
            document.insert(SUBTYPE_KEY, subtype);
        }

        self.backend.upsert(id, document, self.collection()).await
    }

    /// Deletes every document matching `filter`.
    ///
    /// Cascade triggers registered on this collection fire first, in registration
    /// order, each deleting the dependent documents that reference a matched identity.
    /// Dependents are deleted through their own manager, so cascades chain. A document
    /// reached twice along one cascade is only cascaded from once, so reference cycles
    /// terminate.
    pub async fn delete(&self, registry: &Registry, filter: Expr) -> DocumentStoreResult<u64> {
        self.delete_cascading(registry, filter, &mut HashSet::new()).await
    }

    fn delete_cascading<'a>(
        &'a self,
        registry: &'a Registry,
        filter: Expr,
        visited: &'a mut HashSet<(String, ObjectId)>,
    ) -> BoxFuture<'a, DocumentStoreResult<u64>> {
        async move {
            let triggers = registry.triggers(self.collection());

            if triggers.is_empty() {
                return self.backend.delete_many(&filter, self.collection()).await;
            }

            let (seen, fresh): (Vec<ObjectId>, Vec<ObjectId>) = self
                .backend
                .find_ids(&filter, self.collection())
                .await?
                .into_iter()
                .partition(|id| visited.contains(&(self.collection().to_string(), *id)));
            visited.extend(fresh.iter().map(|id| (self.collection().to_string(), *id)));

            if !fresh.is_empty() {
                for trigger in triggers {
                    let dependent = registry.manager(&trigger.dependent)?;
                    let removed = dependent
                        .delete_cascading(
                            registry,
                            Filter::any_of(trigger.field.clone(), fresh.iter().copied()),
                            &mut *visited,
                        )
                        .await?;
                    debug!(
                        source = self.collection(),
                        dependent = trigger.dependent.as_str(),
                        removed,
                        "cascaded delete"
                    );
                }
            }

            // Documents seen earlier in this cascade are deleted by the frame that found them.
            let filter = match seen.is_empty() {
                true => filter,
                false => Filter::and([filter, Filter::none_of(ID_KEY, seen)]),
            };

            self.backend.delete_many(&filter, self.collection()).await
        }
        .boxed()
    }

    /// Applies `update` to every document matching `filter`.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::Definition`] for an empty update.
    pub async fn update(&self, filter: &Expr, update: &Update) -> DocumentStoreResult<u64> {
        if update.is_empty() {
            return Err(DocumentStoreError::Definition(format!(
                "an update on '{}' needs at least one operation",
                self.key
            )));
        }

        self.backend.update_many(filter, update, self.collection()).await
    }

    /// Starts a lazy cursor over the documents matching `query`.
    pub fn find<'r>(&'r self, registry: &'r Registry, query: Query) -> Cursor<'r> {
        Cursor::new(registry, self, query)
    }

    pub async fn count(&self, filter: &Expr) -> DocumentStoreResult<u64> {
        self.backend.count(filter, self.collection()).await
    }

    pub async fn create_index(&self, index: &IndexSpec) -> DocumentStoreResult<String> {
        self.backend.create_index(index, self.collection()).await
    }
}
