//! Batched lookup of existing surrogate keys

use std::collections::HashMap;
use tracing::debug;

use super::error::{LoadError, LoadResult};
use crate::models::{KeyTuple, SurrogateKey, Value};
use crate::store::{KeyStore, KeyedRow};

/// Natural-key tuple to surrogate key, valid for one resolution call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedKeyTable {
    keys: HashMap<KeyTuple, SurrogateKey>,
}

impl ResolvedKeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from store rows whose natural key sits at `positions`
    ///
    /// Returned components are read back in the variants of the `requested`
    /// tuples, so a row matches the tuple it was looked up or inserted for
    /// even when the store column has a different type.
    pub fn from_rows(rows: &[KeyedRow], positions: &[usize], requested: &[KeyTuple]) -> Self {
        let exemplars: Vec<Option<&Value>> = (0..positions.len())
            .map(|i| {
                requested
                    .iter()
                    .filter_map(|t| t.values().get(i))
                    .find(|v| !v.is_null())
            })
            .collect();

        let mut table = Self::new();
        for row in rows {
            let tuple = row.tuple_at(positions);
            let conformed = KeyTuple(
                tuple
                    .values()
                    .iter()
                    .zip(&exemplars)
                    .map(|(value, like)| match like {
                        Some(like) => value.conform_to(like),
                        None => value.clone(),
                    })
                    .collect(),
            );
            table.insert(conformed, row.key);
        }
        table
    }

    /// Record a key; returns the previous key for the tuple, if any
    pub fn insert(&mut self, tuple: KeyTuple, key: SurrogateKey) -> Option<SurrogateKey> {
        self.keys.insert(tuple, key)
    }

    pub fn get(&self, tuple: &KeyTuple) -> Option<SurrogateKey> {
        self.keys.get(tuple).copied()
    }

    pub fn contains(&self, tuple: &KeyTuple) -> bool {
        self.keys.contains_key(tuple)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Tuples from `tuples` with no key yet, in input order
    pub fn missing<'a>(&self, tuples: &'a [KeyTuple]) -> Vec<&'a KeyTuple> {
        tuples.iter().filter(|t| !self.contains(t)).collect()
    }

    /// Merge another table into this one
    pub fn extend(&mut self, other: ResolvedKeyTable) {
        self.keys.extend(other.keys);
    }
}

/// Finds existing keys with one query per call
pub struct KeyLookupService<'a, S: KeyStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: KeyStore + ?Sized> KeyLookupService<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Look up keys for the distinct tuples of one table
    ///
    /// An empty tuple set returns an empty table without querying.
    pub async fn lookup(
        &self,
        table: &str,
        key_column: &str,
        key_columns: &[String],
        tuples: &[KeyTuple],
    ) -> LoadResult<ResolvedKeyTable> {
        if tuples.is_empty() {
            return Ok(ResolvedKeyTable::new());
        }
        let rows = self
            .store
            .lookup(table, key_column, key_columns, tuples)
            .await
            .map_err(|e| LoadError::from_lookup(table, e))?;
        debug!(table, requested = tuples.len(), found = rows.len(), "looked up keys");

        let positions: Vec<usize> = (0..key_columns.len()).collect();
        Ok(ResolvedKeyTable::from_rows(&rows, &positions, tuples))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryKeyStore, MemoryTable};

    #[tokio::test]
    async fn test_lookup_finds_seeded_rows() {
        let store = MemoryKeyStore::new().with_table(MemoryTable::new("dim_org", "org_id"));
        store
            .seed("dim_org", &["org_name"], vec![vec![Value::from("Acme")]])
            .unwrap();

        let service = KeyLookupService::new(&store);
        let tuples = vec![
            KeyTuple(vec![Value::from("Acme")]),
            KeyTuple(vec![Value::from("Globex")]),
        ];
        let found = service
            .lookup("dim_org", "org_id", &["org_name".to_string()], &tuples)
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found.get(&tuples[0]), Some(1));
        assert_eq!(found.missing(&tuples), vec![&tuples[1]]);
    }

    #[test]
    fn test_returned_rows_match_requested_variants() {
        let requested = vec![
            KeyTuple(vec![Value::Integer(5), Value::from("North")]),
            KeyTuple(vec![Value::Integer(6), Value::from("South")]),
        ];
        // Text and double columns read back differently than they were bound
        let rows = vec![
            KeyedRow::new(10, vec![Value::from("5"), Value::from("North")]),
            KeyedRow::new(11, vec![Value::Float(6.0), Value::from("South")]),
        ];

        let table = ResolvedKeyTable::from_rows(&rows, &[0, 1], &requested);
        assert_eq!(table.get(&requested[0]), Some(10));
        assert_eq!(table.get(&requested[1]), Some(11));
        assert!(table.missing(&requested).is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failure_is_typed() {
        let store = MemoryKeyStore::new();
        let service = KeyLookupService::new(&store);
        let err = service
            .lookup(
                "dim_missing",
                "id",
                &["name".to_string()],
                &[KeyTuple(vec![Value::from("x")])],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LoadError::LookupFailure { .. }));
    }
}
