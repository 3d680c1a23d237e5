//! In-memory document storage backend for docspec.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is meant for
//! development, tests and small deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using an async-aware RwLock
//! - **Document-store filters** - Dotted paths, array membership and null matching
//! - **Sorting and paging** - Multi-key sorts with offset and limit
//! - **Bulk updates** - Set, unset, increment, push and pull
//!
//! # Quick Start
//!
//! ```ignore
//! use docspec::prelude::*;
//! use docspec_memory::InMemoryStore;
//!
//! let registry = Registry::builder()
//!     .connection("default", InMemoryStore::new())
//!     .register(&users)?
//!     .build()
//!     .await?;
//!
//! let mut user = Document::new(&users)?;
//! user.set("name", "Alice")?;
//! user.save(&registry).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docspec_memory;

pub mod evaluator;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
