//! Engine error types

use thiserror::Error;

use crate::models::{BatchError, KeyTuple};
use crate::store::StoreError;

/// Errors raised while resolving dimensions or loading facts
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    /// Columns required by a table spec are absent from the batch
    ///
    /// Raised before any store round-trip.
    #[error("Mapping incomplete for '{table}': missing columns {}", .missing.join(", "))]
    MappingIncomplete { table: String, missing: Vec<String> },

    /// The lookup query failed
    #[error("Lookup on '{table}' failed: {source}")]
    LookupFailure { table: String, source: StoreError },

    /// The store rejected an insert because of a constraint
    #[error("Insert into '{table}' violated a constraint: {message}")]
    InsertConstraintViolation { table: String, message: String },

    /// Any other insert failure
    #[error("Insert into '{table}' failed: {source}")]
    InsertFailure { table: String, source: StoreError },

    /// No rows to load
    #[error("No rows to load into '{0}'")]
    EmptyBatch(String),

    /// A key column that must be set is null
    #[error("Null key in column '{column}' of row {row} for '{table}'")]
    NullKey {
        table: String,
        column: String,
        row: usize,
    },

    /// A row's natural key has no surrogate key after lookup and insert
    #[error("Row {row} has no key in '{table}' for natural key {tuple}")]
    UnresolvedKey {
        table: String,
        row: usize,
        tuple: KeyTuple,
    },

    /// The table spec itself cannot be applied
    #[error("Invalid spec for '{table}': {reason}")]
    InvalidSpec { table: String, reason: String },

    /// Batch reshaping failed
    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),
}

impl LoadError {
    /// Classify a store error raised by an insert
    pub(crate) fn from_insert(table: &str, err: StoreError) -> Self {
        match err {
            StoreError::ConstraintViolation(message) => LoadError::InsertConstraintViolation {
                table: table.to_string(),
                message,
            },
            source => LoadError::InsertFailure {
                table: table.to_string(),
                source,
            },
        }
    }

    pub(crate) fn from_lookup(table: &str, source: StoreError) -> Self {
        LoadError::LookupFailure {
            table: table.to_string(),
            source,
        }
    }
}

/// Result type for engine operations
pub type LoadResult<T> = Result<T, LoadError>;
