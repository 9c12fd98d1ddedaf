//! Distinct natural-key projection of a batch

use std::collections::HashSet;

use crate::models::{ColumnMapping, KeyTuple, NaturalKeySpec, TabularBatch, Value};

/// Projection of a batch onto a table's columns, deduplicated by natural key
#[derive(Debug, Clone, PartialEq)]
pub struct KeyProjection {
    /// Store names of the natural-key columns
    pub key_columns: Vec<String>,
    /// Store names of every projected column; natural key first
    pub columns: Vec<String>,
    /// Natural-key tuple of every input row, in row order
    pub row_tuples: Vec<KeyTuple>,
    /// Distinct tuples in first-seen order
    pub distinct: Vec<KeyTuple>,
    /// Projected values per distinct tuple, aligned with `columns`
    pub rows: Vec<Vec<Value>>,
}

impl KeyProjection {
    /// Projected rows for the given tuples, in `distinct` order
    pub fn rows_for(&self, tuples: &HashSet<&KeyTuple>) -> Vec<Vec<Value>> {
        self.distinct
            .iter()
            .zip(&self.rows)
            .filter(|(tuple, _)| tuples.contains(tuple))
            .map(|(_, row)| row.clone())
            .collect()
    }

    /// Positions of the natural-key columns within `columns`
    pub fn key_positions(&self) -> Vec<usize> {
        (0..self.key_columns.len()).collect()
    }
}

/// Extracts the distinct natural-key projection of a batch
pub struct BatchDeduplicator;

impl BatchDeduplicator {
    /// Project `batch` onto `columns` and drop rows repeating a natural key
    ///
    /// Natural-key values are normalized before distinctness is computed,
    /// so dates and timestamps on the same day share one tuple. The first
    /// occurrence of a tuple supplies the non-key values. Missing columns
    /// read as null; callers validate the batch beforehand.
    pub fn project(
        batch: &TabularBatch,
        natural_key: &NaturalKeySpec,
        columns: &[ColumnMapping],
    ) -> KeyProjection {
        let key_batch_columns = natural_key.batch_columns();
        let extra: Vec<&ColumnMapping> = columns
            .iter()
            .filter(|c| !key_batch_columns.contains(&c.batch_column))
            .collect();

        let mut projected_columns = natural_key.store_columns();
        projected_columns.extend(extra.iter().map(|c| c.store_column.clone()));

        let mut seen = HashSet::new();
        let mut row_tuples = Vec::with_capacity(batch.len());
        let mut distinct = Vec::new();
        let mut rows = Vec::new();

        for row in batch.rows() {
            let tuple = KeyTuple::normalized(
                key_batch_columns
                    .iter()
                    .map(|c| row.get(c).unwrap_or(&Value::Null)),
            );
            if seen.insert(tuple.clone()) {
                let mut values = tuple.values().to_vec();
                values.extend(
                    extra
                        .iter()
                        .map(|c| row.get(&c.batch_column).cloned().unwrap_or_default()),
                );
                distinct.push(tuple.clone());
                rows.push(values);
            }
            row_tuples.push(tuple);
        }

        KeyProjection {
            key_columns: natural_key.store_columns(),
            columns: projected_columns,
            row_tuples,
            distinct,
            rows,
        }
    }

    /// Distinct natural-key tuples of a batch
    pub fn distinct_tuples(batch: &TabularBatch, natural_key: &NaturalKeySpec) -> Vec<KeyTuple> {
        Self::project(batch, natural_key, &[]).distinct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnDef, DataType, Row, Schema};
    use chrono::NaiveDate;

    fn batch() -> TabularBatch {
        let schema = Schema::new(vec![
            ColumnDef::new("region", DataType::String),
            ColumnDef::new("held_at", DataType::DateTime),
            ColumnDef::new("title", DataType::String),
        ])
        .unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        TabularBatch::from_rows(
            schema,
            vec![
                Row::new()
                    .with("region", "North")
                    .with("held_at", day.and_hms_opt(9, 0, 0).unwrap())
                    .with("title", "first"),
                Row::new()
                    .with("region", "North")
                    .with("held_at", day.and_hms_opt(18, 30, 0).unwrap())
                    .with("title", "second"),
                Row::new()
                    .with("region", "South")
                    .with("held_at", day.and_hms_opt(9, 0, 0).unwrap())
                    .with("title", "third"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_same_day_timestamps_collapse() {
        let nk = NaturalKeySpec::new(vec![
            ColumnMapping::identity("region"),
            ColumnMapping::new("held_at", "held_on"),
        ]);
        let projection =
            BatchDeduplicator::project(&batch(), &nk, &[ColumnMapping::identity("title")]);

        assert_eq!(projection.columns, vec!["region", "held_on", "title"]);
        assert_eq!(projection.distinct.len(), 2);
        assert_eq!(projection.row_tuples.len(), 3);
        assert_eq!(projection.row_tuples[0], projection.row_tuples[1]);
        assert_eq!(
            projection.rows[0],
            vec![
                Value::from("North"),
                Value::Integer(20240501),
                Value::from("first")
            ]
        );
    }

    #[test]
    fn test_distinct_tuples() {
        let nk = NaturalKeySpec::identity(["region"]);
        let tuples = BatchDeduplicator::distinct_tuples(&batch(), &nk);
        assert_eq!(
            tuples,
            vec![
                KeyTuple(vec![Value::from("North")]),
                KeyTuple(vec![Value::from("South")])
            ]
        );
    }
}
