//! Error types and result types for document mapping operations.
//!
//! Every fallible operation in this crate returns [`DocumentStoreResult<T>`]. Errors fall
//! into a few families:
//!
//! - **Definition errors** are raised while declaring field specs, building schemas,
//!   registering collections or loading settings. They indicate a programming or
//!   configuration mistake and are never retried.
//! - **Validation errors** are raised when a value violates a field's constraints
//!   ([`FieldValidationError`]) or when a whole document fails validation
//!   ([`ValidationReport`]).
//! - **Store errors** wrap failures reported by a [`StoreBackend`](crate::backend::StoreBackend).

use std::{collections::BTreeMap, fmt};

use bson::error::Error as BsonError;
use serde::Serialize;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

use crate::value::{Value, ValueType};

/// Represents all possible errors raised by the mapping layer and its store backends.
#[derive(Error, Debug)]
pub enum DocumentStoreError {
    /// Serialization/deserialization error when converting between BSON and JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A field spec, schema, registration or settings file is malformed.
    #[error("Definition error: {0}")]
    Definition(String),
    /// A single value violated the constraints of its field.
    #[error(transparent)]
    FieldValidation(#[from] FieldValidationError),
    /// A whole document failed validation. Carries every failing path.
    #[error("Document validation failed: {0}")]
    DocumentValidation(ValidationReport),
    /// The requested document was not found in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// No collection is registered under the given key.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// The named field is not declared by the schema.
    #[error("Unknown field '{field}' on schema '{schema}'")]
    UnknownField {
        schema: String,
        field: String,
    },
    /// A stored or wire payload does not have the shape its field expects.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// A document identity could not be parsed.
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for document mapping operations.
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for DocumentStoreError {
    fn from(err: toml::de::Error) -> Self {
        DocumentStoreError::Definition(err.to_string())
    }
}

impl From<std::io::Error> for DocumentStoreError {
    fn from(err: std::io::Error) -> Self {
        DocumentStoreError::Initialization(err.to_string())
    }
}

/// A single field constraint violation.
///
/// Raised synchronously when a value is assigned to a field, or while validating a
/// whole document (the first failing field wins).
#[derive(Error, Debug, Clone)]
#[error("Field '{field}' is invalid: {message} (observed {observed_type})")]
pub struct FieldValidationError {
    /// Name (or dotted path) of the offending field.
    pub field: String,
    /// The rejected value.
    pub value: Value,
    /// The variant of the rejected value.
    pub observed_type: ValueType,
    /// Human readable description of the violated constraint.
    pub message: String,
}

impl FieldValidationError {
    pub fn new(field: impl Into<String>, value: &Value, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.clone(),
            observed_type: value.value_type(),
            message: message.into(),
        }
    }
}

/// Aggregated validation errors keyed by field path.
///
/// Paths use `.` as separator; list elements are addressed by index
/// (`tags.2`). The report serializes as a plain JSON object of path to messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationReport {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a message against a path.
    pub fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(path.into())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Messages recorded against `path`, if any.
    pub fn get(&self, path: &str) -> Option<&[String]> {
        self.errors.get(path).map(Vec::as_slice)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.errors
            .iter()
            .map(|(path, messages)| (path.as_str(), messages.as_slice()))
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;

        for (path, messages) in &self.errors {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{path}: {}", messages.join(", "))?;
        }

        Ok(())
    }
}

impl From<FieldValidationError> for ValidationReport {
    fn from(err: FieldValidationError) -> Self {
        let mut report = ValidationReport::new();
        report.push(err.field, err.message);
        report
    }
}
