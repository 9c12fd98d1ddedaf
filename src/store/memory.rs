//! In-memory key store
//!
//! Keeps tables in process memory behind a mutex. Supports generated
//! surrogate keys, NOT NULL and UNIQUE constraints, and all-or-nothing
//! inserts, which is enough to exercise the engine without a database.
//! Every statement is counted so callers can assert on round-trips.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::sql::validate_identifier;
use super::{KeyStore, KeyedRow, StoreError, StoreResult};
use crate::models::{KeyTuple, SurrogateKey, Value};

/// Definition and contents of one in-memory table
#[derive(Debug, Clone)]
pub struct MemoryTable {
    name: String,
    key_column: Option<String>,
    not_null: HashSet<String>,
    unique: Vec<Vec<String>>,
    next_key: SurrogateKey,
    rows: Vec<HashMap<String, Value>>,
}

impl MemoryTable {
    /// Table with a generated integer key column starting at 1
    pub fn new(name: impl Into<String>, key_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_column: Some(key_column.into()),
            not_null: HashSet::new(),
            unique: Vec::new(),
            next_key: 1,
            rows: Vec::new(),
        }
    }

    /// Table without a generated key (linking tables)
    pub fn keyless(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_column: None,
            not_null: HashSet::new(),
            unique: Vec::new(),
            next_key: 1,
            rows: Vec::new(),
        }
    }

    /// Reject nulls in the given columns
    pub fn not_null<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.not_null.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Reject duplicate combinations of the given columns
    pub fn unique<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.unique
            .push(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Start generated keys at `next`
    pub fn starting_at(mut self, next: SurrogateKey) -> Self {
        self.next_key = next;
        self
    }

    fn value<'a>(row: &'a HashMap<String, Value>, column: &str) -> &'a Value {
        row.get(column).unwrap_or(&Value::Null)
    }

    fn check_constraints(&self, new_rows: &[HashMap<String, Value>]) -> StoreResult<()> {
        for (idx, row) in new_rows.iter().enumerate() {
            for column in &self.not_null {
                if Self::value(row, column).is_null() {
                    return Err(StoreError::ConstraintViolation(format!(
                        "null value in column '{}' of relation '{}' (row {})",
                        column, self.name, idx
                    )));
                }
            }
        }

        for columns in &self.unique {
            let mut seen: HashSet<Vec<&Value>> = HashSet::new();
            for row in self.rows.iter().chain(new_rows.iter()) {
                let key: Vec<&Value> = columns.iter().map(|c| Self::value(row, c)).collect();
                // SQL unique constraints ignore rows with a null component
                if key.iter().any(|v| v.is_null()) {
                    continue;
                }
                if !seen.insert(key) {
                    return Err(StoreError::ConstraintViolation(format!(
                        "duplicate key value violates unique constraint on '{}' ({})",
                        self.name,
                        columns.join(", ")
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Statement counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Lookup queries issued
    pub lookups: usize,
    /// Insert statements issued (including failed ones)
    pub inserts: usize,
    /// Rows written by successful inserts
    pub rows_inserted: usize,
}

/// In-memory [`KeyStore`]
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    tables: Mutex<HashMap<String, MemoryTable>>,
    stats: Mutex<StoreStats>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table; replaces any table with the same name
    pub fn with_table(self, table: MemoryTable) -> Self {
        if let Ok(mut tables) = self.tables.lock() {
            tables.insert(table.name.clone(), table);
        }
        self
    }

    /// Insert rows directly, bypassing counters (test fixtures, seeding)
    ///
    /// Returns the generated keys.
    pub fn seed(
        &self,
        table: &str,
        columns: &[&str],
        rows: Vec<Vec<Value>>,
    ) -> StoreResult<Vec<SurrogateKey>> {
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let mut tables = self.lock_tables()?;
        let table = Self::table_mut(&mut tables, table)?;
        let written = Self::write_rows(table, &columns, &rows)?;
        Ok(written.into_iter().map(|(key, _)| key).collect())
    }

    /// Snapshot of a table's rows
    pub fn rows(&self, table: &str) -> StoreResult<Vec<HashMap<String, Value>>> {
        let tables = self.lock_tables()?;
        tables
            .get(table)
            .map(|t| t.rows.clone())
            .ok_or_else(|| StoreError::QueryFailed(format!("relation '{}' does not exist", table)))
    }

    /// Current statement counters
    pub fn stats(&self) -> StoreStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    /// Reset statement counters
    pub fn reset_stats(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            *stats = StoreStats::default();
        }
    }

    fn lock_tables(
        &self,
    ) -> StoreResult<std::sync::MutexGuard<'_, HashMap<String, MemoryTable>>> {
        self.tables
            .lock()
            .map_err(|e| StoreError::ConnectionFailed(format!("Lock error: {}", e)))
    }

    fn bump(&self, f: impl FnOnce(&mut StoreStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    fn table_mut<'a>(
        tables: &'a mut HashMap<String, MemoryTable>,
        name: &str,
    ) -> StoreResult<&'a mut MemoryTable> {
        tables
            .get_mut(name)
            .ok_or_else(|| StoreError::QueryFailed(format!("relation '{}' does not exist", name)))
    }

    /// Validate and apply rows atomically
    fn write_rows(
        table: &mut MemoryTable,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> StoreResult<Vec<(SurrogateKey, HashMap<String, Value>)>> {
        if let Some(bad) = rows.iter().position(|r| r.len() != columns.len()) {
            return Err(StoreError::InvalidInput(format!(
                "row {} has {} values for {} columns",
                bad,
                rows[bad].len(),
                columns.len()
            )));
        }

        let mut next_key = table.next_key;
        let mut new_rows = Vec::with_capacity(rows.len());
        let mut keys = Vec::with_capacity(rows.len());
        for values in rows {
            let mut row: HashMap<String, Value> = columns
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect();
            if let Some(key_column) = &table.key_column {
                row.insert(key_column.clone(), Value::Integer(next_key));
            }
            keys.push(next_key);
            next_key += 1;
            new_rows.push(row);
        }

        table.check_constraints(&new_rows)?;

        if table.key_column.is_some() {
            table.next_key = next_key;
        }
        table.rows.extend(new_rows.iter().cloned());
        Ok(keys.into_iter().zip(new_rows).collect())
    }
}

#[async_trait(?Send)]
impl KeyStore for MemoryKeyStore {
    async fn lookup(
        &self,
        table: &str,
        key_column: &str,
        natural_key_columns: &[String],
        tuples: &[KeyTuple],
    ) -> StoreResult<Vec<KeyedRow>> {
        if tuples.is_empty() {
            return Ok(Vec::new());
        }
        validate_identifier(table)?;
        self.bump(|s| s.lookups += 1);

        let tables = self.lock_tables()?;
        let mem = tables.get(table).ok_or_else(|| {
            StoreError::QueryFailed(format!("relation '{}' does not exist", table))
        })?;
        let wanted: HashSet<&KeyTuple> = tuples.iter().collect();

        let mut found = Vec::new();
        for row in &mem.rows {
            let values: Vec<Value> = natural_key_columns
                .iter()
                .map(|c| MemoryTable::value(row, c).clone())
                .collect();
            let tuple = KeyTuple::normalized(&values);
            if wanted.contains(&tuple) {
                let key = super::key_from_value(MemoryTable::value(row, key_column), key_column)?;
                found.push(KeyedRow::new(key, values));
            }
        }
        Ok(found)
    }

    async fn insert(
        &self,
        table: &str,
        key_column: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> StoreResult<Vec<KeyedRow>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        validate_identifier(table)?;
        self.bump(|s| s.inserts += 1);

        let mut tables = self.lock_tables()?;
        let mem = Self::table_mut(&mut tables, table)?;
        if mem.key_column.as_deref() != Some(key_column) {
            return Err(StoreError::QueryFailed(format!(
                "column '{}' of relation '{}' is not a generated key",
                key_column, table
            )));
        }
        let written = Self::write_rows(mem, columns, rows)?;
        drop(tables);

        self.bump(|s| s.rows_inserted += written.len());
        Ok(written
            .into_iter()
            .map(|(key, row)| {
                let values = columns
                    .iter()
                    .map(|c| MemoryTable::value(&row, c).clone())
                    .collect();
                KeyedRow::new(key, values)
            })
            .collect())
    }

    async fn append(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> StoreResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        validate_identifier(table)?;
        self.bump(|s| s.inserts += 1);

        let mut tables = self.lock_tables()?;
        let mem = Self::table_mut(&mut tables, table)?;
        let written = Self::write_rows(mem, columns, rows)?;
        drop(tables);

        self.bump(|s| s.rows_inserted += written.len());
        Ok(written.len() as u64)
    }

    async fn health_check(&self) -> StoreResult<bool> {
        Ok(self.tables.lock().is_ok())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn store() -> MemoryKeyStore {
        MemoryKeyStore::new().with_table(
            MemoryTable::new("dim_location", "location_id")
                .not_null(["region"])
                .unique(["region", "settlement"]),
        )
    }

    #[tokio::test]
    async fn test_insert_generates_keys() {
        let store = store();
        let rows = store
            .insert(
                "dim_location",
                "location_id",
                &cols(&["region", "settlement"]),
                &[
                    vec![Value::from("North"), Value::from("Lake")],
                    vec![Value::from("South"), Value::from("Hill")],
                ],
            )
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, 1);
        assert_eq!(rows[1].key, 2);
        assert_eq!(rows[1].values, vec![Value::from("South"), Value::from("Hill")]);
        assert_eq!(store.stats().rows_inserted, 2);
    }

    #[tokio::test]
    async fn test_lookup_is_null_safe() {
        let store = store();
        store
            .seed(
                "dim_location",
                &["region", "settlement"],
                vec![vec![Value::from("North"), Value::Null]],
            )
            .unwrap();

        let found = store
            .lookup(
                "dim_location",
                "location_id",
                &cols(&["region", "settlement"]),
                &[KeyTuple(vec![Value::from("North"), Value::Null])],
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(store.stats().lookups, 1);
    }

    #[tokio::test]
    async fn test_empty_lookup_does_not_query() {
        let store = store();
        let found = store
            .lookup("dim_location", "location_id", &cols(&["region"]), &[])
            .await
            .unwrap();
        assert!(found.is_empty());
        assert_eq!(store.stats().lookups, 0);
    }

    #[tokio::test]
    async fn test_constraint_violation_is_all_or_nothing() {
        let store = store();
        let err = store
            .insert(
                "dim_location",
                "location_id",
                &cols(&["region", "settlement"]),
                &[
                    vec![Value::from("North"), Value::from("Lake")],
                    vec![Value::Null, Value::from("Hill")],
                ],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::ConstraintViolation(_)));
        assert!(store.rows("dim_location").unwrap().is_empty());

        // Keys are not consumed by the failed statement
        let rows = store
            .insert(
                "dim_location",
                "location_id",
                &cols(&["region", "settlement"]),
                &[vec![Value::from("North"), Value::from("Lake")]],
            )
            .await
            .unwrap();
        assert_eq!(rows[0].key, 1);
    }

    #[tokio::test]
    async fn test_unique_violation() {
        let store = store();
        let err = store
            .insert(
                "dim_location",
                "location_id",
                &cols(&["region", "settlement"]),
                &[
                    vec![Value::from("North"), Value::from("Lake")],
                    vec![Value::from("North"), Value::from("Lake")],
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let store = MemoryKeyStore::new();
        let err = store
            .append("link", &cols(&["a"]), &[vec![Value::Integer(1)]])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::QueryFailed(_)));
    }
}
