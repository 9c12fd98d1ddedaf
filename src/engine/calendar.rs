//! Calendar dimension generation

use chrono::{Datelike, NaiveDate};
use std::collections::HashSet;
use tracing::info;

use super::error::{LoadError, LoadResult};
use crate::models::{ColumnDef, DataType, KeyTuple, Row, Schema, TabularBatch, Value, date_key};
use crate::store::KeyStore;

/// Calendar key column, `YYYYMMDD`
pub const DATE_KEY_COLUMN: &str = "date_id";

/// Columns of a calendar row, in insert order
pub const CALENDAR_COLUMNS: &[&str] = &[
    DATE_KEY_COLUMN,
    "date",
    "year",
    "month",
    "day_of_month",
    "day_of_week",
    "quarter",
];

fn calendar_schema() -> LoadResult<Schema> {
    Ok(Schema::new(vec![
        ColumnDef::required(DATE_KEY_COLUMN, DataType::Integer),
        ColumnDef::required("date", DataType::Date),
        ColumnDef::required("year", DataType::Integer),
        ColumnDef::required("month", DataType::Integer),
        ColumnDef::required("day_of_month", DataType::Integer),
        ColumnDef::required("day_of_week", DataType::Integer),
        ColumnDef::required("quarter", DataType::Integer),
    ])?)
}

fn calendar_row(date: NaiveDate) -> Row {
    Row::new()
        .with(DATE_KEY_COLUMN, date_key(date))
        .with("date", date)
        .with("year", date.year())
        .with("month", date.month() as i64)
        .with("day_of_month", date.day() as i64)
        .with("day_of_week", date.weekday().number_from_monday() as i64)
        .with("quarter", ((date.month() - 1) / 3 + 1) as i64)
}

/// One row per day from `start` to `end`, inclusive
///
/// Bounds given in reverse order are swapped.
pub fn calendar_rows(start: NaiveDate, end: NaiveDate) -> LoadResult<TabularBatch> {
    let (start, end) = if start <= end { (start, end) } else { (end, start) };
    let rows = start.iter_days().take_while(|d| *d <= end).map(calendar_row).collect();
    Ok(TabularBatch::from_rows(calendar_schema()?, rows)?)
}

/// Write the days between `start` and `end` that `table` does not have yet
///
/// One lookup, then one append for the missing days. Returns the number
/// of days written.
pub async fn load_calendar<S: KeyStore + ?Sized>(
    store: &S,
    table: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> LoadResult<u64> {
    let calendar = calendar_rows(start, end)?;
    let key_columns = vec![DATE_KEY_COLUMN.to_string()];
    let tuples: Vec<KeyTuple> = calendar
        .rows()
        .iter()
        .map(|r| KeyTuple(vec![r.get(DATE_KEY_COLUMN).cloned().unwrap_or_default()]))
        .collect();

    let existing: HashSet<KeyTuple> = store
        .lookup(table, DATE_KEY_COLUMN, &key_columns, &tuples)
        .await
        .map_err(|e| LoadError::from_lookup(table, e))?
        .into_iter()
        .map(|row| KeyTuple(vec![Value::Integer(row.key)]))
        .collect();

    let columns: Vec<String> = CALENDAR_COLUMNS.iter().map(|c| c.to_string()).collect();
    let missing: Vec<Vec<Value>> = calendar
        .rows()
        .iter()
        .zip(&tuples)
        .filter(|(_, tuple)| !existing.contains(*tuple))
        .map(|(row, _)| {
            columns
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or_default())
                .collect()
        })
        .collect();

    let written = store
        .append(table, &columns, &missing)
        .await
        .map_err(|e| LoadError::from_insert(table, e))?;
    info!(
        table,
        days = calendar.len(),
        existing = existing.len(),
        written,
        "loaded calendar"
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryKeyStore, MemoryTable};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_calendar_rows() {
        let rows = calendar_rows(day(2024, 3, 31), day(2024, 4, 1)).unwrap();
        assert_eq!(rows.len(), 2);

        let april = &rows.rows()[1];
        assert_eq!(april.get("date_id"), Some(&Value::Integer(20240401)));
        assert_eq!(april.get("quarter"), Some(&Value::Integer(2)));
        // 2024-04-01 was a Monday
        assert_eq!(april.get("day_of_week"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_reversed_bounds_are_swapped() {
        let rows = calendar_rows(day(2024, 1, 10), day(2024, 1, 1)).unwrap();
        assert_eq!(rows.len(), 10);
        assert_eq!(rows.rows()[0].get("day_of_month"), Some(&Value::Integer(1)));
    }

    #[tokio::test]
    async fn test_load_calendar_skips_existing_days() {
        let store = MemoryKeyStore::new()
            .with_table(MemoryTable::keyless("dim_date").unique([DATE_KEY_COLUMN]));

        let written = load_calendar(&store, "dim_date", day(2024, 1, 1), day(2024, 1, 31))
            .await
            .unwrap();
        assert_eq!(written, 31);

        let written = load_calendar(&store, "dim_date", day(2024, 1, 15), day(2024, 2, 10))
            .await
            .unwrap();
        assert_eq!(written, 10);
        assert_eq!(store.rows("dim_date").unwrap().len(), 41);
        assert_eq!(store.stats().lookups, 2);
    }
}
