//! PostgreSQL key store
//!
//! Server backend built on `tokio-postgres`. Statements are rendered with
//! `$n` placeholders and row-value IN lists. Parameters are converted to
//! the types PostgreSQL infers for the prepared statement, so an integer
//! key component binds correctly against an INT4 column.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{ToSql, Type};
use tracing::{debug, error};

use super::sql::{SqlBuilder, Statement};
use super::{KeyStore, KeyedRow, StoreError, StoreResult, key_from_value};
use crate::models::{KeyTuple, Value};

type Param = Box<dyn ToSql + Sync + Send>;

/// PostgreSQL-backed [`KeyStore`]
pub struct PostgresKeyStore {
    /// Connection string
    connection_string: String,
    /// Client, serialized so statements never interleave
    client: Arc<Mutex<tokio_postgres::Client>>,
    sql: SqlBuilder,
}

impl PostgresKeyStore {
    /// Connect and spawn the connection driver on the current runtime
    pub async fn connect(connection_string: &str) -> StoreResult<Self> {
        let (client, connection) =
            tokio_postgres::connect(connection_string, tokio_postgres::NoTls)
                .await
                .map_err(|e| {
                    StoreError::ConnectionFailed(format!(
                        "Failed to connect to PostgreSQL: {}",
                        e
                    ))
                })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(Self {
            connection_string: connection_string.to_string(),
            client: Arc::new(Mutex::new(client)),
            sql: SqlBuilder::postgres(),
        })
    }

    /// Connection string with the password masked
    pub fn connection_string_masked(&self) -> String {
        if let Some(at_pos) = self.connection_string.find('@')
            && let Some(colon_pos) = self.connection_string[..at_pos].rfind(':')
        {
            let prefix = &self.connection_string[..colon_pos + 1];
            let suffix = &self.connection_string[at_pos..];
            return format!("{}****{}", prefix, suffix);
        }
        self.connection_string.clone()
    }

    /// Convert a value to a parameter of the type the server expects
    fn to_param(value: &Value, ty: &Type) -> StoreResult<Param> {
        let mismatch = || {
            StoreError::UnsupportedType(format!(
                "cannot bind {} to parameter of type {}",
                value.type_name(),
                ty
            ))
        };

        let param: Param = match *ty {
            Type::INT2 => match value {
                Value::Null => Box::new(None::<i16>),
                Value::Integer(i) => Box::new(i16::try_from(*i).map_err(|_| mismatch())?),
                _ => return Err(mismatch()),
            },
            Type::INT4 => match value {
                Value::Null => Box::new(None::<i32>),
                Value::Integer(i) => Box::new(i32::try_from(*i).map_err(|_| mismatch())?),
                _ => return Err(mismatch()),
            },
            Type::INT8 => match value {
                Value::Null => Box::new(None::<i64>),
                Value::Integer(i) => Box::new(*i),
                _ => return Err(mismatch()),
            },
            Type::FLOAT4 => match value {
                Value::Null => Box::new(None::<f32>),
                Value::Float(f) => Box::new(*f as f32),
                Value::Integer(i) => Box::new(*i as f32),
                _ => return Err(mismatch()),
            },
            Type::FLOAT8 => match value {
                Value::Null => Box::new(None::<f64>),
                Value::Float(f) => Box::new(*f),
                Value::Integer(i) => Box::new(*i as f64),
                _ => return Err(mismatch()),
            },
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => match value {
                Value::Null => Box::new(None::<String>),
                other => Box::new(other.to_string()),
            },
            Type::DATE => match value {
                Value::Null => Box::new(None::<NaiveDate>),
                Value::Date(d) => Box::new(*d),
                Value::DateTime(dt) => Box::new(dt.date()),
                _ => return Err(mismatch()),
            },
            Type::TIMESTAMP => match value {
                Value::Null => Box::new(None::<NaiveDateTime>),
                Value::DateTime(dt) => Box::new(*dt),
                Value::Date(d) => Box::new(d.and_time(chrono::NaiveTime::MIN)),
                _ => return Err(mismatch()),
            },
            _ => return Err(mismatch()),
        };
        Ok(param)
    }

    /// Read one column of a result row
    fn column_value(row: &tokio_postgres::Row, idx: usize) -> StoreResult<Value> {
        let ty = row.columns()[idx].type_().clone();
        let fetch_err =
            |e: tokio_postgres::Error| StoreError::QueryFailed(format!("Row fetch error: {}", e));

        let value = match ty {
            Type::INT2 => row
                .try_get::<_, Option<i16>>(idx)
                .map_err(fetch_err)?
                .map(|v| Value::Integer(v.into())),
            Type::INT4 => row
                .try_get::<_, Option<i32>>(idx)
                .map_err(fetch_err)?
                .map(|v| Value::Integer(v.into())),
            Type::INT8 => row
                .try_get::<_, Option<i64>>(idx)
                .map_err(fetch_err)?
                .map(Value::Integer),
            Type::FLOAT4 => row
                .try_get::<_, Option<f32>>(idx)
                .map_err(fetch_err)?
                .map(|v| Value::Float(v.into())),
            Type::FLOAT8 => row
                .try_get::<_, Option<f64>>(idx)
                .map_err(fetch_err)?
                .map(Value::Float),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => row
                .try_get::<_, Option<String>>(idx)
                .map_err(fetch_err)?
                .map(Value::String),
            Type::DATE => row
                .try_get::<_, Option<NaiveDate>>(idx)
                .map_err(fetch_err)?
                .map(Value::Date),
            Type::TIMESTAMP => row
                .try_get::<_, Option<NaiveDateTime>>(idx)
                .map_err(fetch_err)?
                .map(Value::DateTime),
            other => {
                return Err(StoreError::UnsupportedType(format!(
                    "unsupported PostgreSQL column type {}",
                    other
                )));
            }
        };
        Ok(value.unwrap_or(Value::Null))
    }

    fn map_write_error(e: tokio_postgres::Error) -> StoreError {
        // SQLSTATE class 23: integrity constraint violation
        let is_constraint = e
            .code()
            .map(|code: &SqlState| code.code().starts_with("23"))
            .unwrap_or(false);
        if is_constraint {
            StoreError::ConstraintViolation(e.to_string())
        } else {
            StoreError::QueryFailed(format!("Insert failed: {}", e))
        }
    }

    fn bind(prepared: &tokio_postgres::Statement, stmt: &Statement) -> StoreResult<Vec<Param>> {
        stmt.params
            .iter()
            .zip(prepared.params())
            .map(|(value, ty)| Self::to_param(value, ty))
            .collect()
    }

    fn keyed(rows: &[tokio_postgres::Row], key_column: &str) -> StoreResult<Vec<KeyedRow>> {
        rows.iter()
            .map(|row| {
                let key = key_from_value(&Self::column_value(row, 0)?, key_column)?;
                let values = (1..row.len())
                    .map(|i| Self::column_value(row, i))
                    .collect::<StoreResult<Vec<Value>>>()?;
                Ok(KeyedRow::new(key, values))
            })
            .collect()
    }
}

fn as_refs(params: &[Param]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

#[async_trait(?Send)]
impl KeyStore for PostgresKeyStore {
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
        debug!(table, tuples = tuples.len(), "postgres lookup");

        let client = self.client.lock().await;
        let prepared = client
            .prepare(&stmt.sql)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Prepare failed: {}", e)))?;
        let params = Self::bind(&prepared, &stmt)?;
        let rows = client
            .query(&prepared, &as_refs(&params))
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Query failed: {}", e)))?;

        Self::keyed(&rows, key_column)
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
        debug!(table, rows = rows.len(), "postgres insert");

        let mut client = self.client.lock().await;
        let tx = client
            .transaction()
            .await
            .map_err(|e| StoreError::TransactionFailed(format!("Begin failed: {}", e)))?;
        let prepared = tx
            .prepare(&stmt.sql)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Prepare failed: {}", e)))?;
        let params = Self::bind(&prepared, &stmt)?;
        let returned = tx
            .query(&prepared, &as_refs(&params))
            .await
            .map_err(Self::map_write_error)?;
        tx.commit()
            .await
            .map_err(|e| StoreError::TransactionFailed(format!("Commit failed: {}", e)))?;

        Self::keyed(&returned, key_column)
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
        debug!(table, rows = rows.len(), "postgres append");

        let mut client = self.client.lock().await;
        let tx = client
            .transaction()
            .await
            .map_err(|e| StoreError::TransactionFailed(format!("Begin failed: {}", e)))?;
        let prepared = tx
            .prepare(&stmt.sql)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Prepare failed: {}", e)))?;
        let params = Self::bind(&prepared, &stmt)?;
        let written = tx
            .execute(&prepared, &as_refs(&params))
            .await
            .map_err(Self::map_write_error)?;
        tx.commit()
            .await
            .map_err(|e| StoreError::TransactionFailed(format!("Commit failed: {}", e)))?;

        Ok(written)
    }

    async fn health_check(&self) -> StoreResult<bool> {
        let client = self.client.lock().await;
        let row = client
            .query_one("SELECT 1::BIGINT", &[])
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Health check failed: {}", e)))?;
        let one: i64 = row
            .try_get(0)
            .map_err(|e| StoreError::QueryFailed(format!("Health check failed: {}", e)))?;
        Ok(one == 1)
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}
