//! Typed document mapping over document-oriented stores.
//!
//! This crate is the core of the docspec project and provides:
//!
//! - **Field specs** ([`field`]) - Declarative field types, constraints and transforms
//! - **Schemas** ([`schema`]) - Ordered field tables with inheritance and collection bindings
//! - **Records and documents** ([`record`], [`document`]) - Validated value containers
//! - **Registry** ([`registry`], [`manager`], [`cursor`]) - Collection managers, polymorphic
//!   inflation and cascading deletes
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Query and update API** ([`query`]) - Filter expressions, sorting and bulk updates
//! - **Settings** ([`config`]) - Named connection settings loaded from TOML
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docspec_core::{field::FieldSpec, schema::Schema, document::Document};
//!
//! let simple = Schema::document("simple")
//!     .collection("simple")
//!     .field("name", FieldSpec::text().required().build()?)
//!     .field("score", FieldSpec::numeric().min(0).max(10).build()?)
//!     .build()?;
//!
//! let mut document = Document::new(&simple)?;
//! document.set("name", "first")?;
//! document.save(&registry).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docspec_core;

pub mod backend;
pub mod config;
pub mod cursor;
pub mod document;
pub mod error;
pub mod field;
pub mod manager;
pub mod query;
pub mod record;
pub mod registry;
pub mod schema;
pub mod value;
