//! Key store abstraction over the backing relational store
//!
//! The loading engine needs exactly two batched operations from a store:
//! - lookup of surrogate keys by natural-key tuples (one query per call)
//! - multi-row insert returning the generated keys (one transaction per call)
//!
//! Backends:
//! - Memory: in-process tables, used by tests and dry runs
//! - DuckDB: embedded database (file or in-memory)
//! - PostgreSQL: server deployments
//!
//! The engine never opens or closes connections; a store handle is created
//! by the caller and borrowed for the duration of a load.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{KeyTuple, SurrogateKey, Value};

#[cfg(feature = "duckdb-backend")]
pub mod duckdb;

#[cfg(feature = "postgres-backend")]
pub mod postgres;

pub mod config;
pub mod memory;
pub mod sql;

#[cfg(feature = "duckdb-backend")]
pub use self::duckdb::DuckDbKeyStore;

#[cfg(feature = "postgres-backend")]
pub use self::postgres::PostgresKeyStore;

pub use config::{StoreBackendType, StoreConfig};
pub use memory::{MemoryKeyStore, MemoryTable, StoreStats};
pub use sql::{SqlBuilder, Statement};

/// Error type for store operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Failed to connect to the store
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A NOT NULL, UNIQUE, FOREIGN KEY or CHECK constraint rejected a write
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Transaction could not be started or committed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Table or column name is not a plain SQL identifier
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Value or column type the backend cannot bind or read
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// Malformed call (e.g. tuple arity does not match the column list)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A row returned by lookup or insert: the surrogate key plus the
/// requested columns in request order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedRow {
    pub key: SurrogateKey,
    pub values: Vec<Value>,
}

impl KeyedRow {
    pub fn new(key: SurrogateKey, values: Vec<Value>) -> Self {
        Self { key, values }
    }

    /// Natural-key tuple built from the given positions of `values`
    pub fn tuple_at(&self, positions: &[usize]) -> KeyTuple {
        KeyTuple::normalized(
            positions
                .iter()
                .map(|&i| self.values.get(i).unwrap_or(&Value::Null)),
        )
    }
}

/// Batched lookup and insert primitives over a relational store
#[async_trait(?Send)]
pub trait KeyStore {
    /// Find existing rows whose natural-key columns match any of `tuples`
    ///
    /// Issues one parameterized query; an empty `tuples` slice returns an
    /// empty result without querying. Returned `values` follow the order
    /// of `natural_key_columns`.
    async fn lookup(
        &self,
        table: &str,
        key_column: &str,
        natural_key_columns: &[String],
        tuples: &[KeyTuple],
    ) -> StoreResult<Vec<KeyedRow>>;

    /// Insert `rows` and return the generated key with the inserted columns
    ///
    /// Issues one multi-row statement inside one transaction. Any
    /// constraint violation aborts the whole insert.
    async fn insert(
        &self,
        table: &str,
        key_column: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> StoreResult<Vec<KeyedRow>>;

    /// Insert `rows` without returning keys (linking tables)
    ///
    /// Same transactional contract as [`KeyStore::insert`]. Returns the
    /// number of rows written.
    async fn append(&self, table: &str, columns: &[String], rows: &[Vec<Value>])
    -> StoreResult<u64>;

    /// Check if the store is reachable
    async fn health_check(&self) -> StoreResult<bool>;

    /// Backend type name ("memory", "duckdb" or "postgres")
    fn backend_type(&self) -> &'static str;
}

#[async_trait(?Send)]
impl<S: KeyStore + ?Sized> KeyStore for Box<S> {
    async fn lookup(
        &self,
        table: &str,
        key_column: &str,
        natural_key_columns: &[String],
        tuples: &[KeyTuple],
    ) -> StoreResult<Vec<KeyedRow>> {
        (**self)
            .lookup(table, key_column, natural_key_columns, tuples)
            .await
    }

    async fn insert(
        &self,
        table: &str,
        key_column: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> StoreResult<Vec<KeyedRow>> {
        (**self).insert(table, key_column, columns, rows).await
    }

    async fn append(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> StoreResult<u64> {
        (**self).append(table, columns, rows).await
    }

    async fn health_check(&self) -> StoreResult<bool> {
        (**self).health_check().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}

/// Read a surrogate key out of a store value
pub(crate) fn key_from_value(value: &Value, key_column: &str) -> StoreResult<SurrogateKey> {
    value.as_integer().ok_or_else(|| {
        StoreError::UnsupportedType(format!(
            "key column '{}' returned {} instead of an integer",
            key_column,
            value.type_name()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyed_row_tuple_at() {
        let row = KeyedRow::new(
            7,
            vec![Value::from("North"), Value::Integer(3), Value::from("Lake")],
        );
        let tuple = row.tuple_at(&[0, 2]);
        assert_eq!(tuple.values(), &[Value::from("North"), Value::from("Lake")]);
    }

    #[test]
    fn test_key_from_value() {
        assert_eq!(key_from_value(&Value::Integer(5), "id").unwrap(), 5);
        assert!(matches!(
            key_from_value(&Value::from("5"), "id"),
            Err(StoreError::UnsupportedType(_))
        ));
    }
}
