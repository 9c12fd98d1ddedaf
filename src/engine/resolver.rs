//! Lookup-or-insert resolution of one table's natural keys
//!
//! ```text
//! validate -> dedup -> lookup -> insert(missing) -> merge -> drop
//! ```
//!
//! Every call re-queries the store; nothing is cached between calls.

use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, warn};

use super::dedup::BatchDeduplicator;
use super::error::{LoadError, LoadResult};
use super::insert::InsertService;
use super::lookup::KeyLookupService;
use super::merge::RowKeyMerger;
use crate::models::{
    ColumnMapping, DimensionSpec, KeyTuple, NaturalKeySpec, SurrogateKey, TabularBatch, Value,
};
use crate::store::KeyStore;

/// Counters for one resolution call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolveStats {
    /// Input rows
    pub rows: usize,
    /// Distinct natural-key tuples
    pub distinct: usize,
    /// Tuples already present in the store
    pub found: usize,
    /// Tuples inserted by this call
    pub inserted: usize,
}

/// Output of one resolution call
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Input batch with the key column applied
    pub batch: TabularBatch,
    /// Key of every row in row order (empty for a no-op dimension)
    pub row_keys: Vec<SurrogateKey>,
    pub stats: ResolveStats,
}

/// Table, key and columns for one lookup-or-insert pass
pub(crate) struct KeyPlan<'s> {
    pub table: &'s str,
    pub key_column: &'s str,
    pub natural_key: &'s NaturalKeySpec,
    /// Columns written on insert; natural-key columns are always included
    pub columns: Vec<ColumnMapping>,
    pub output_column: &'s str,
    /// Remove the written columns from the output batch
    pub drop_consumed: bool,
}

/// Resolves a dimension's natural keys to surrogate keys
pub struct DimensionResolver<'a, S: KeyStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: KeyStore + ?Sized> DimensionResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Replace the dimension's columns with its surrogate key column
    ///
    /// Fails with [`LoadError::MappingIncomplete`] before any store call
    /// when a consumed column is absent. The output keeps every input row,
    /// and rows sharing a natural key share a key.
    pub async fn resolve(
        &self,
        batch: TabularBatch,
        spec: &DimensionSpec,
    ) -> LoadResult<Resolution> {
        let consumed = spec.consumed_columns();
        require_columns(&batch, &spec.table, consumed.iter().map(|c| c.batch_column.as_str()))?;

        if spec.natural_key.is_empty() {
            warn!(table = %spec.table, "dimension has no natural-key columns, skipping");
            let rows = batch.len();
            return Ok(Resolution {
                batch,
                row_keys: Vec::new(),
                stats: ResolveStats {
                    rows,
                    ..Default::default()
                },
            });
        }

        let all_temporal = spec.natural_key.columns().iter().all(|c| {
            batch
                .schema()
                .get(&c.batch_column)
                .map(|def| def.data_type.is_temporal())
                .unwrap_or(false)
        });
        if all_temporal {
            return self.resolve_date_key(batch, spec, &consumed);
        }

        let plan = KeyPlan {
            table: &spec.table,
            key_column: &spec.key_column,
            natural_key: &spec.natural_key,
            columns: consumed,
            output_column: spec.output_column(),
            drop_consumed: true,
        };
        self.lookup_or_insert(batch, &plan).await
    }

    /// Date-keyed dimensions use the `YYYYMMDD` value as the key directly
    fn resolve_date_key(
        &self,
        batch: TabularBatch,
        spec: &DimensionSpec,
        consumed: &[ColumnMapping],
    ) -> LoadResult<Resolution> {
        let columns = spec.natural_key.columns();
        if columns.len() != 1 {
            return Err(LoadError::InvalidSpec {
                table: spec.table.clone(),
                reason: format!(
                    "date-keyed dimension needs exactly one date column, found {}",
                    columns.len()
                ),
            });
        }
        let column = &columns[0].batch_column;

        let mut row_keys = Vec::with_capacity(batch.len());
        for (row, values) in batch.rows().iter().enumerate() {
            let value = values.get(column).unwrap_or(&Value::Null);
            match value.to_key_component() {
                Value::Integer(key) => row_keys.push(key),
                _ => {
                    return Err(LoadError::NullKey {
                        table: spec.table.clone(),
                        column: column.clone(),
                        row,
                    });
                }
            }
        }

        let stats = ResolveStats {
            rows: batch.len(),
            distinct: row_keys.iter().collect::<HashSet<_>>().len(),
            found: 0,
            inserted: 0,
        };
        info!(
            table = %spec.table,
            rows = stats.rows,
            distinct = stats.distinct,
            "resolved date keys without store access"
        );

        let drop: Vec<String> = consumed.iter().map(|c| c.batch_column.clone()).collect();
        let batch = RowKeyMerger::attach(batch, spec.output_column(), &row_keys, &drop)?;
        Ok(Resolution {
            batch,
            row_keys,
            stats,
        })
    }

    /// Dedup, look up, insert what is missing, merge back
    pub(crate) async fn lookup_or_insert(
        &self,
        batch: TabularBatch,
        plan: &KeyPlan<'_>,
    ) -> LoadResult<Resolution> {
        let projection = BatchDeduplicator::project(&batch, plan.natural_key, &plan.columns);

        let lookup = KeyLookupService::new(self.store);
        let mut keys = lookup
            .lookup(
                plan.table,
                plan.key_column,
                &projection.key_columns,
                &projection.distinct,
            )
            .await?;
        let found = keys.len();

        let missing: HashSet<&KeyTuple> = keys.missing(&projection.distinct).into_iter().collect();
        let rows = projection.rows_for(&missing);

        let insert = InsertService::new(self.store);
        let inserted = insert
            .insert_missing(
                plan.table,
                plan.key_column,
                &projection.columns,
                projection.key_columns.len(),
                &rows,
            )
            .await?;
        let inserted_count = inserted.len();
        keys.extend(inserted);

        let stats = ResolveStats {
            rows: batch.len(),
            distinct: projection.distinct.len(),
            found,
            inserted: inserted_count,
        };
        info!(
            table = plan.table,
            rows = stats.rows,
            distinct = stats.distinct,
            found = stats.found,
            inserted = stats.inserted,
            "resolved keys"
        );

        let consumed: Vec<String> = if plan.drop_consumed {
            plan.columns.iter().map(|c| c.batch_column.clone()).collect()
        } else {
            Vec::new()
        };
        let (batch, row_keys) = RowKeyMerger::merge(
            batch,
            plan.table,
            &projection.row_tuples,
            &keys,
            plan.output_column,
            &consumed,
        )?;

        Ok(Resolution {
            batch,
            row_keys,
            stats,
        })
    }
}

/// Fail with [`LoadError::MappingIncomplete`] unless every column is present
pub(crate) fn require_columns<'c>(
    batch: &TabularBatch,
    table: &str,
    columns: impl IntoIterator<Item = &'c str>,
) -> LoadResult<()> {
    let missing = batch.schema().missing(columns);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(LoadError::MappingIncomplete {
            table: table.to_string(),
            missing,
        })
    }
}
