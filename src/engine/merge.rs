//! Propagation of resolved keys back onto every input row

use super::error::{LoadError, LoadResult};
use super::lookup::ResolvedKeyTable;
use crate::models::{ColumnDef, DataType, KeyTuple, SurrogateKey, TabularBatch, Value};

/// Joins resolved keys onto the original, non-deduplicated rows
pub struct RowKeyMerger;

impl RowKeyMerger {
    /// Key of every row, in row order
    ///
    /// Rows sharing a tuple receive the same key. A tuple without a key
    /// is [`LoadError::UnresolvedKey`].
    pub fn keys_for_rows(
        table: &str,
        row_tuples: &[KeyTuple],
        keys: &ResolvedKeyTable,
    ) -> LoadResult<Vec<SurrogateKey>> {
        row_tuples
            .iter()
            .enumerate()
            .map(|(row, tuple)| {
                keys.get(tuple).ok_or_else(|| LoadError::UnresolvedKey {
                    table: table.to_string(),
                    row,
                    tuple: tuple.clone(),
                })
            })
            .collect()
    }

    /// Drop `consumed` columns and add `output_column` holding each row's key
    ///
    /// Row count and order are preserved.
    pub fn merge(
        batch: TabularBatch,
        table: &str,
        row_tuples: &[KeyTuple],
        keys: &ResolvedKeyTable,
        output_column: &str,
        consumed: &[String],
    ) -> LoadResult<(TabularBatch, Vec<SurrogateKey>)> {
        if row_tuples.len() != batch.len() {
            return Err(LoadError::InvalidSpec {
                table: table.to_string(),
                reason: format!(
                    "{} key tuples for {} rows",
                    row_tuples.len(),
                    batch.len()
                ),
            });
        }
        let row_keys = Self::keys_for_rows(table, row_tuples, keys)?;
        let batch = Self::attach(batch, output_column, &row_keys, consumed)?;
        Ok((batch, row_keys))
    }

    /// Replace `consumed` columns with a key column
    pub fn attach(
        batch: TabularBatch,
        output_column: &str,
        row_keys: &[SurrogateKey],
        consumed: &[String],
    ) -> LoadResult<TabularBatch> {
        let values = row_keys.iter().map(|k| Value::Integer(*k)).collect();
        Ok(batch
            .drop_columns(consumed)
            .push_column(ColumnDef::required(output_column, DataType::Integer), values)?)
    }
}
