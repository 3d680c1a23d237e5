//! Convenient re-exports of commonly used types from docspec.
//!
//! ```ignore
//! use docspec::prelude::*;
//! ```

pub use docspec_core::{
    backend::{SharedStoreBackend, StoreBackend, StoreBackendBuilder},
    config::{ConnectionSettings, Settings},
    cursor::Cursor,
    document::{Document, DocumentState},
    error::{DocumentStoreError, DocumentStoreResult, FieldValidationError, ValidationReport},
    field::{FieldKind, FieldSpec, Validator},
    manager::CollectionManager,
    query::{Expr, FieldOp, Filter, IndexSpec, Query, QueryBuilder, QueryVisitor, Sort, SortDirection, Update},
    record::{PopulateOutcome, Record},
    registry::{Registry, RegistryBuilder},
    schema::{CollectionKey, Schema},
    value::{JsonMap, Reference, Value},
};
