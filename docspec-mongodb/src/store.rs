use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, Document};
use futures::TryStreamExt;
use mongodb::{
    options::{ClientOptions, FindOptions, IndexOptions},
    Client, Collection as MongoCollection, IndexModel,
};
use tracing::debug;

use docspec_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    config::ConnectionSettings,
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, IndexSpec, Query, Update},
};

use crate::query::{translate_update, MongoQueryTranslator};

fn backend_error(err: mongodb::error::Error) -> DocumentStoreError {
    DocumentStoreError::Backend(err.to_string())
}

#[derive(Debug, Clone)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn find_one(&self, id: ObjectId, collection: &str) -> DocumentStoreResult<Option<Document>> {
        self.get_collection(collection)
            .find_one(doc! { "_id": id })
            .await
            .map_err(backend_error)
    }

    async fn find(&self, query: Query, collection: &str) -> DocumentStoreResult<Vec<Document>> {
        let mut options = FindOptions::default();

        if let Some(limit) = query.limit {
            options.limit = Some(limit as i64);
        }
        if let Some(skip) = query.offset {
            options.skip = Some(skip as u64);
        }
        if !query.sort.is_empty() {
            options.sort = Some(
                query
                    .sort
                    .iter()
                    .map(|sort| (sort.field.clone(), Bson::Int32(sort.direction.as_i32())))
                    .collect(),
            );
        }

        self.get_collection(collection)
            .find(MongoQueryTranslator::translate(&query.filter)?)
            .with_options(options)
            .await
            .map_err(backend_error)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend_error)
    }

    async fn find_ids(&self, filter: &Expr, collection: &str) -> DocumentStoreResult<Vec<ObjectId>> {
        Ok(self
            .get_collection(collection)
            .distinct("_id", MongoQueryTranslator::translate(filter)?)
            .await
            .map_err(backend_error)?
            .into_iter()
            .filter_map(|id| id.as_object_id())
            .collect())
    }

    async fn count(&self, filter: &Expr, collection: &str) -> DocumentStoreResult<u64> {
        self.get_collection(collection)
            .count_documents(MongoQueryTranslator::translate(filter)?)
            .await
            .map_err(backend_error)
    }

    async fn upsert(&self, id: ObjectId, mut document: Document, collection: &str) -> DocumentStoreResult<ObjectId> {
        document.insert("_id", id);

        self.get_collection(collection)
            .replace_one(doc! { "_id": id }, document)
            .upsert(true)
            .await
            .map_err(backend_error)?;

        Ok(id)
    }

    async fn delete_many(&self, filter: &Expr, collection: &str) -> DocumentStoreResult<u64> {
        let result = self
            .get_collection(collection)
            .delete_many(MongoQueryTranslator::translate(filter)?)
            .await
            .map_err(backend_error)?;

        debug!(collection, deleted = result.deleted_count, "deleted documents");
        Ok(result.deleted_count)
    }

    async fn update_many(&self, filter: &Expr, update: &Update, collection: &str) -> DocumentStoreResult<u64> {
        Ok(self
            .get_collection(collection)
            .update_many(MongoQueryTranslator::translate(filter)?, translate_update(update))
            .await
            .map_err(backend_error)?
            .modified_count)
    }

    async fn create_index(&self, index: &IndexSpec, collection: &str) -> DocumentStoreResult<String> {
        let keys: Document = index
            .keys
            .iter()
            .map(|(field, direction)| (field.clone(), Bson::Int32(direction.as_i32())))
            .collect();

        Ok(self
            .get_collection(collection)
            .create_index(
                IndexModel::builder()
                    .keys(keys)
                    .options(
                        IndexOptions::builder()
                            .unique(index.unique)
                            .sparse(index.sparse)
                            .name(index.index_name())
                            .build(),
                    )
                    .build(),
            )
            .await
            .map_err(backend_error)?
            .index_name)
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }

    /// A builder for the server and database named by connection settings.
    pub fn from_settings(settings: &ConnectionSettings) -> Self {
        Self::new(&settings.connection_string, &settings.database_name)
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(MongoDbStore::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            )
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}
