//! DuckDB key store
//!
//! Embedded backend for single-node warehouses and tests. Supports both a
//! database file and in-memory mode. Statements are rendered with `?`
//! placeholders; multi-row inserts run inside an explicit transaction.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use super::sql::{SqlBuilder, Statement};
use super::{KeyStore, KeyedRow, StoreError, StoreResult, key_from_value};
use crate::models::{KeyTuple, Value};

/// DuckDB-backed [`KeyStore`]
pub struct DuckDbKeyStore {
    /// Path to the database file (None for in-memory)
    db_path: Option<PathBuf>,
    /// Connection, serialized behind a mutex
    connection: Mutex<duckdb::Connection>,
    sql: SqlBuilder,
}

impl DuckDbKeyStore {
    /// Open (or create) a database file
    pub fn new(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = db_path.as_ref().to_path_buf();
        let connection = duckdb::Connection::open(&path).map_err(|e| {
            StoreError::ConnectionFailed(format!("Failed to open DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: Some(path),
            connection: Mutex::new(connection),
            sql: SqlBuilder::duckdb(),
        })
    }

    /// Create an in-memory database
    pub fn in_memory() -> StoreResult<Self> {
        let connection = duckdb::Connection::open_in_memory().map_err(|e| {
            StoreError::ConnectionFailed(format!("Failed to create in-memory DuckDB: {}", e))
        })?;

        Ok(Self {
            db_path: None,
            connection: Mutex::new(connection),
            sql: SqlBuilder::duckdb(),
        })
    }

    /// Database file path (None for in-memory)
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run one or more statements that return no rows (DDL, fixtures)
    pub fn execute_batch(&self, sql: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(sql)
            .map_err(|e| StoreError::QueryFailed(format!("Batch execute failed: {}", e)))
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, duckdb::Connection>> {
        self.connection
            .lock()
            .map_err(|e| StoreError::ConnectionFailed(format!("Lock error: {}", e)))
    }

    /// Bind parameters
    fn to_duckdb(value: &Value) -> duckdb::types::Value {
        use duckdb::types::{TimeUnit, Value as DuckValue};

        match value {
            Value::Null => DuckValue::Null,
            Value::String(s) => DuckValue::Text(s.clone()),
            Value::Integer(i) => DuckValue::BigInt(*i),
            Value::Float(f) => DuckValue::Double(*f),
            Value::Date(d) => {
                let days = d.signed_duration_since(unix_epoch()).num_days();
                DuckValue::Date32(days as i32)
            }
            Value::DateTime(dt) => {
                DuckValue::Timestamp(TimeUnit::Microsecond, dt.and_utc().timestamp_micros())
            }
        }
    }

    /// Convert a DuckDB ValueRef to a store value
    fn from_duckdb(value: duckdb::types::ValueRef) -> StoreResult<Value> {
        use duckdb::types::{TimeUnit, ValueRef};

        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::TinyInt(i) => Value::Integer(i.into()),
            ValueRef::SmallInt(i) => Value::Integer(i.into()),
            ValueRef::Int(i) => Value::Integer(i.into()),
            ValueRef::BigInt(i) => Value::Integer(i),
            ValueRef::UTinyInt(i) => Value::Integer(i.into()),
            ValueRef::USmallInt(i) => Value::Integer(i.into()),
            ValueRef::UInt(i) => Value::Integer(i.into()),
            ValueRef::UBigInt(i) => Value::Integer(i64::try_from(i).map_err(|_| {
                StoreError::UnsupportedType(format!("UBIGINT {} out of range", i))
            })?),
            ValueRef::HugeInt(i) => Value::Integer(i64::try_from(i).map_err(|_| {
                StoreError::UnsupportedType(format!("HUGEINT {} out of range", i))
            })?),
            ValueRef::Float(f) => Value::Float(f as f64),
            ValueRef::Double(f) => Value::Float(f),
            ValueRef::Decimal(d) => Value::Float(d.to_string().parse().map_err(|_| {
                StoreError::UnsupportedType(format!("DECIMAL {} is not representable", d))
            })?),
            ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Date32(days) => {
                let date = unix_epoch()
                    .checked_add_signed(chrono::Duration::days(days.into()))
                    .ok_or_else(|| {
                        StoreError::UnsupportedType(format!("DATE offset {} out of range", days))
                    })?;
                Value::Date(date)
            }
            ValueRef::Timestamp(unit, raw) => {
                let micros = match unit {
                    TimeUnit::Second => raw.saturating_mul(1_000_000),
                    TimeUnit::Millisecond => raw.saturating_mul(1_000),
                    TimeUnit::Microsecond => raw,
                    TimeUnit::Nanosecond => raw / 1_000,
                };
                let dt = DateTime::from_timestamp_micros(micros).ok_or_else(|| {
                    StoreError::UnsupportedType(format!("TIMESTAMP {} out of range", raw))
                })?;
                Value::DateTime(dt.naive_utc())
            }
            other => {
                return Err(StoreError::UnsupportedType(format!(
                    "unsupported DuckDB value {:?}",
                    other
                )));
            }
        })
    }

    fn map_write_error(e: duckdb::Error) -> StoreError {
        let message = e.to_string();
        if message.contains("Constraint Error") {
            StoreError::ConstraintViolation(message)
        } else {
            StoreError::QueryFailed(format!("Insert failed: {}", message))
        }
    }

    /// Run a statement and read `width` columns from every returned row
    fn query_rows(
        conn: &duckdb::Connection,
        stmt: &Statement,
        width: usize,
        map_err: fn(duckdb::Error) -> StoreError,
    ) -> StoreResult<Vec<Vec<Value>>> {
        let params: Vec<duckdb::types::Value> = stmt.params.iter().map(Self::to_duckdb).collect();
        let mut prepared = conn
            .prepare(&stmt.sql)
            .map_err(|e| StoreError::QueryFailed(format!("Prepare failed: {}", e)))?;
        let mut result_rows = prepared
            .query(duckdb::params_from_iter(params.iter()))
            .map_err(map_err)?;

        let mut rows = Vec::new();
        while let Some(row) = result_rows.next().map_err(map_err)? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                let value_ref = row
                    .get_ref(i)
                    .map_err(|e| StoreError::QueryFailed(format!("Row fetch error: {}", e)))?;
                values.push(Self::from_duckdb(value_ref)?);
            }
            rows.push(values);
        }
        Ok(rows)
    }

    fn keyed(rows: Vec<Vec<Value>>, key_column: &str) -> StoreResult<Vec<KeyedRow>> {
        rows.into_iter()
            .map(|mut values| {
                if values.is_empty() {
                    return Err(StoreError::QueryFailed(format!(
                        "row without '{}'",
                        key_column
                    )));
                }
                let key = key_from_value(&values.remove(0), key_column)?;
                Ok(KeyedRow::new(key, values))
            })
            .collect()
    }
}

fn unix_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

#[async_trait(?Send)]
impl KeyStore for DuckDbKeyStore {
    async fn lookup(
        &self,
        table: &str,
        key_column: &str,
        natural_key_columns: &[String],
        tuples: &[KeyTuple],
    ) -> StoreResult<Vec<KeyedRow>> {
        let Some(stmt) = self
            .sql
            .lookup(table, key_column, natural_key_columns, tuples)?
        else {
            return Ok(Vec::new());
        };
        debug!(table, tuples = tuples.len(), "duckdb lookup");

        let conn = self.lock()?;
        let rows = Self::query_rows(&conn, &stmt, natural_key_columns.len() + 1, |e| {
            StoreError::QueryFailed(format!("Query failed: {}", e))
        })?;
        Self::keyed(rows, key_column)
    }

    async fn insert(
        &self,
        table: &str,
        key_column: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> StoreResult<Vec<KeyedRow>> {
        let Some(stmt) = self.sql.insert(table, columns, rows, Some(key_column))? else {
            return Ok(Vec::new());
        };
        debug!(table, rows = rows.len(), "duckdb insert");

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::TransactionFailed(format!("Begin failed: {}", e)))?;
        // Dropping the transaction on error rolls it back
        let returned = Self::query_rows(&tx, &stmt, columns.len() + 1, Self::map_write_error)?;
        tx.commit()
            .map_err(|e| StoreError::TransactionFailed(format!("Commit failed: {}", e)))?;

        Self::keyed(returned, key_column)
    }

    async fn append(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> StoreResult<u64> {
        let Some(stmt) = self.sql.insert(table, columns, rows, None)? else {
            return Ok(0);
        };
        debug!(table, rows = rows.len(), "duckdb append");

        let params: Vec<duckdb::types::Value> = stmt.params.iter().map(Self::to_duckdb).collect();
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::TransactionFailed(format!("Begin failed: {}", e)))?;
        let written = tx
            .execute(&stmt.sql, duckdb::params_from_iter(params.iter()))
            .map_err(Self::map_write_error)?;
        tx.commit()
            .map_err(|e| StoreError::TransactionFailed(format!("Commit failed: {}", e)))?;

        Ok(written as u64)
    }

    async fn health_check(&self) -> StoreResult<bool> {
        let conn = self.lock()?;
        let one: i64 = conn
            .query_row("SELECT CAST(1 AS BIGINT)", [], |row| row.get(0))
            .map_err(|e| StoreError::QueryFailed(format!("Health check failed: {}", e)))?;
        Ok(one == 1)
    }

    fn backend_type(&self) -> &'static str {
        "duckdb"
    }
}
