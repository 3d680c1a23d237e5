//! Main docspec crate: typed document mapping for document stores.
//!
//! This crate is the primary entry point for users of the docspec framework. It
//! re-exports the core types from the sub-crates and provides access to the storage
//! backends.
//!
//! # Features
//!
//! - **Declarative field specs** - Types, constraints, defaults and custom validators
//! - **Schema inheritance** - Subtypes stored polymorphically in their base collection
//! - **Three representations** - Native values, BSON storage and JSON wire form
//! - **References** - Resolved on demand along dotted paths
//! - **Cascading deletes** - Dependents removed when the documents they reference go
//! - **Multiple backends** - In-memory and MongoDB stores behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docspec::{prelude::*, memory::InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let simple = Schema::document("simple")
//!         .collection("simple")
//!         .field("name", FieldSpec::text().required().build()?)
//!         .build()?;
//!     let complex = Schema::document("complex")
//!         .extends(&simple)
//!         .collection(":complex")
//!         .field("friend", FieldSpec::reference("simple").build()?)
//!         .cascade_from("simple", "friend")
//!         .build()?;
//!
//!     let registry = Registry::builder()
//!         .connection("default", InMemoryStore::new())
//!         .register(&simple)?
//!         .register(&complex)?
//!         .build()
//!         .await?;
//!
//!     let mut first = Document::new(&simple)?;
//!     first.set("name", "first")?;
//!     first.save(&registry).await?;
//!
//!     let mut second = Document::new(&complex)?;
//!     second.set("name", "second")?;
//!     second.set("friend", first.id())?;
//!     second.save(&registry).await?;
//!
//!     // Polymorphic: both come back, each as its own schema.
//!     let all = registry.find("simple", Query::new())?.try_collect().await?;
//!     assert_eq!(all.len(), 2);
//!
//!     // Cascading: deleting `first` removes `second`.
//!     first.delete(&registry).await?;
//!     assert_eq!(registry.count("simple", &Filter::all()).await?, 0);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - MongoDB backend (requires `mongodb` feature)

pub mod prelude;
pub mod sequence;

pub use docspec_core::{
    backend, config, cursor, document, error, field, manager, query, record, registry, schema, value,
};

// Re-export BSON and JSON types for convenience
pub use bson;
pub use serde_json;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docspec_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docspec_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}

#[cfg(feature = "mongodb")]
pub use connect::connect;

#[cfg(feature = "mongodb")]
mod connect {
    use tracing::info;

    use docspec_core::{
        backend::StoreBackendBuilder,
        config::Settings,
        error::DocumentStoreResult,
        registry::{Registry, RegistryBuilder},
    };
    use docspec_mongodb::MongoDbStoreBuilder;

    /// Opens a MongoDB client for every configured connection and returns a registry
    /// builder with all of them attached.
    ///
    /// ```ignore
    /// let settings = Settings::load("config/")?;
    /// let registry = docspec::connect(&settings).await?.register(&simple)?.build().await?;
    /// ```
    pub async fn connect(settings: &Settings) -> DocumentStoreResult<RegistryBuilder> {
        let mut builder = Registry::builder();

        for (name, connection) in settings.connections() {
            let store = MongoDbStoreBuilder::from_settings(connection).build().await?;
            info!(connection = name, database = connection.database_name.as_str(), "opened connection");
            builder = builder.connection(name, store);
        }

        Ok(builder)
    }
}
