//! Storage backend abstraction.
//!
//! A [`StoreBackend`] is the external document store client behind one named connection.
//! The mapping layer only ever talks to the store through this trait, one awaited round
//! trip per operation. Documents cross this boundary in their storage representation
//! ([`bson::Document`]) with the identity under the `_id` key.
//!
//! # Examples
//!
//! ```ignore
//! use docspec::backend::StoreBackend;
//! use bson::{doc, oid::ObjectId};
//!
//! let backend = MyBackendImpl::new();
//! let id = ObjectId::new();
//!
//! backend.upsert(id, doc! { "_id": id, "name": "Alice" }, "users").await?;
//! let found = backend.find_one(id, "users").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use bson::{oid::ObjectId, Document as RawDocument};

use crate::{
    error::DocumentStoreResult,
    query::{Expr, IndexSpec, Query, Update},
};

/// Abstract interface for document store clients.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; a registry shares one backend handle between
/// every collection manager bound to its connection.
///
/// # Error Handling
///
/// Driver failures are reported as
/// [`DocumentStoreError::Backend`](crate::error::DocumentStoreError::Backend).
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Fetches one document by identity.
    ///
    /// # Returns
    ///
    /// `Ok(None)` when no document with that identity exists.
    async fn find_one(
        &self,
        id: ObjectId,
        collection: &str,
    ) -> DocumentStoreResult<Option<RawDocument>>;

    /// Runs a query and returns every matching document.
    ///
    /// Results follow the query's sort keys; without sort keys the order is the store's
    /// natural order.
    async fn find(&self, query: Query, collection: &str) -> DocumentStoreResult<Vec<RawDocument>>;

    /// Returns the distinct identities of documents matching `filter`.
    async fn find_ids(&self, filter: &Expr, collection: &str) -> DocumentStoreResult<Vec<ObjectId>>;

    /// Counts documents matching `filter`.
    async fn count(&self, filter: &Expr, collection: &str) -> DocumentStoreResult<u64>;

    /// Inserts or fully replaces the document with identity `id`.
    ///
    /// # Returns
    ///
    /// The identity the document was written under.
    async fn upsert(
        &self,
        id: ObjectId,
        document: RawDocument,
        collection: &str,
    ) -> DocumentStoreResult<ObjectId>;

    /// Deletes every document matching `filter` and returns how many were removed.
    async fn delete_many(&self, filter: &Expr, collection: &str) -> DocumentStoreResult<u64>;

    /// Applies `update` to every document matching `filter` without upserting.
    ///
    /// # Returns
    ///
    /// The number of modified documents.
    async fn update_many(
        &self,
        filter: &Expr,
        update: &Update,
        collection: &str,
    ) -> DocumentStoreResult<u64>;

    /// Creates an index and returns its name.
    async fn create_index(&self, index: &IndexSpec, collection: &str) -> DocumentStoreResult<String>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// A shared, type-erased backend handle as held by the registry.
pub type SharedStoreBackend = Arc<dyn StoreBackend>;

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
