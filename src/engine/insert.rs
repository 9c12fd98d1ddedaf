//! Insertion of natural keys absent from the store

use tracing::debug;

use super::error::{LoadError, LoadResult};
use super::lookup::ResolvedKeyTable;
use crate::models::{KeyTuple, Value};
use crate::store::KeyStore;

/// Inserts missing rows with one statement per call
pub struct InsertService<'a, S: KeyStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: KeyStore + ?Sized> InsertService<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Insert `rows` and return the keys assigned to them
    ///
    /// The natural key occupies the first `key_width` columns of every row.
    /// The store runs the statement in one transaction, so a constraint
    /// violation leaves nothing behind for this call.
    pub async fn insert_missing(
        &self,
        table: &str,
        key_column: &str,
        columns: &[String],
        key_width: usize,
        rows: &[Vec<Value>],
    ) -> LoadResult<ResolvedKeyTable> {
        if rows.is_empty() {
            return Ok(ResolvedKeyTable::new());
        }
        let returned = self
            .store
            .insert(table, key_column, columns, rows)
            .await
            .map_err(|e| LoadError::from_insert(table, e))?;
        debug!(table, inserted = returned.len(), "inserted rows");

        if returned.len() != rows.len() {
            return Err(LoadError::InsertFailure {
                table: table.to_string(),
                source: crate::store::StoreError::QueryFailed(format!(
                    "insert returned {} rows for {} inserted",
                    returned.len(),
                    rows.len()
                )),
            });
        }

        let positions: Vec<usize> = (0..key_width).collect();
        let requested: Vec<KeyTuple> = rows
            .iter()
            .map(|row| KeyTuple::normalized(row.iter().take(key_width)))
            .collect();
        Ok(ResolvedKeyTable::from_rows(&returned, &positions, &requested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryKeyStore, MemoryTable};

    #[tokio::test]
    async fn test_insert_returns_keys_by_tuple() {
        let store = MemoryKeyStore::new().with_table(MemoryTable::new("dim_person", "person_id"));
        let service = InsertService::new(&store);
        let columns = vec!["name".to_string(), "role".to_string()];

        let keys = service
            .insert_missing(
                "dim_person",
                "person_id",
                &columns,
                1,
                &[
                    vec![Value::from("Alice"), Value::from("Volunteer")],
                    vec![Value::from("Bob"), Value::from("Volunteer")],
                ],
            )
            .await
            .unwrap();

        assert_eq!(keys.len(), 2);
        assert_eq!(keys.get(&KeyTuple(vec![Value::from("Bob")])), Some(2));
    }

    #[tokio::test]
    async fn test_constraint_violation_is_classified() {
        let store = MemoryKeyStore::new()
            .with_table(MemoryTable::new("dim_person", "person_id").not_null(["name"]));
        let service = InsertService::new(&store);

        let err = service
            .insert_missing(
                "dim_person",
                "person_id",
                &["name".to_string()],
                1,
                &[vec![Value::Null]],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::InsertConstraintViolation { .. }));
    }

    #[tokio::test]
    async fn test_nothing_to_insert() {
        let store = MemoryKeyStore::new();
        let service = InsertService::new(&store);
        let keys = service
            .insert_missing("dim_person", "person_id", &["name".to_string()], 1, &[])
            .await
            .unwrap();
        assert!(keys.is_empty());
        assert_eq!(store.stats().inserts, 0);
    }
}
