//! Lazy cursors over query results.

use std::collections::{HashMap, VecDeque};

use bson::{oid::ObjectId, Bson, Document as RawDocument};

use crate::{
    document::Document,
    error::{DocumentStoreError, DocumentStoreResult},
    manager::CollectionManager,
    query::Query,
    registry::Registry,
    schema::ID_KEY,
};

/// Iterates the documents matched by a query, inflating each stored document into the
/// schema its `_subtype` names.
///
/// The query runs on the first call to [`Cursor::next`]. Documents are inflated once per
/// identity; iterating again after [`Cursor::rewind`] re-runs the query.
///
/// # Examples
///
/// ```ignore
/// let mut cursor = registry.find("simple", Query::filter(Filter::gt("score", 3)))?;
/// while let Some(document) = cursor.next().await? {
///     println!("{:?}", document.id());
/// }
/// ```
#[derive(Debug)]
pub struct Cursor<'r> {
    registry: &'r Registry,
    manager: &'r CollectionManager,
    query: Query,
    buffer: Option<VecDeque<RawDocument>>,
    cache: HashMap<ObjectId, Document>,
}

impl<'r> Cursor<'r> {
    pub(crate) fn new(registry: &'r Registry, manager: &'r CollectionManager, query: Query) -> Self {
        Self {
            registry,
            manager,
            query,
            buffer: None,
            cache: HashMap::new(),
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// The next matching document, or `None` when the results are exhausted.
    pub async fn next(&mut self) -> DocumentStoreResult<Option<Document>> {
        if self.buffer.is_none() {
            let raw = self
                .manager
                .backend()
                .find(self.query.clone(), self.manager.collection())
                .await?;
            self.buffer = Some(raw.into());
        }

        let Some(raw) = self.buffer.as_mut().and_then(VecDeque::pop_front) else {
            return Ok(None);
        };

        let id = match raw.get(ID_KEY) {
            Some(Bson::ObjectId(id)) => *id,
            _ => {
                return Err(DocumentStoreError::InvalidDocument(format!(
                    "stored document in '{}' carries no identity",
                    self.manager.collection()
                )));
            }
        };

        if let Some(document) = self.cache.get(&id) {
            return Ok(Some(document.clone()));
        }

        let document = self.registry.inflate(self.manager.collection(), &raw)?;
        self.cache.insert(id, document.clone());

        Ok(Some(document))
    }

    /// Number of stored documents matching the query filter. Limit and offset are not
    /// applied.
    pub async fn count(&self) -> DocumentStoreResult<u64> {
        self.manager.count(&self.query.filter).await
    }

    /// Drops buffered results so the next call re-runs the query.
    pub fn rewind(&mut self) {
        self.buffer = None;
        self.cache.clear();
    }

    /// Drains the remaining results.
    pub async fn try_collect(mut self) -> DocumentStoreResult<Vec<Document>> {
        let mut documents = Vec::new();

        while let Some(document) = self.next().await? {
            documents.push(document);
        }

        Ok(documents)
    }
}
