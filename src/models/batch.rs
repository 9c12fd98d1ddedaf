//! Schema-typed tabular batches
//!
//! A [`TabularBatch`] is an ordered sequence of rows sharing a declared
//! [`Schema`]. Every constructor and mutating operation keeps rows and
//! schema in agreement, so a batch that exists is always valid.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::value::Value;

/// Errors raised while building or reshaping a batch
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BatchError {
    /// Required columns are absent from the schema
    #[error("Missing columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    /// A row carries a column the schema does not declare
    #[error("Unexpected column '{column}' in row {row}")]
    UnexpectedColumn { row: usize, column: String },

    /// A row lacks a declared column
    #[error("Row {row} is missing column '{column}'")]
    IncompleteRow { row: usize, column: String },

    /// A value does not match the declared column type
    #[error("Row {row}, column '{column}': expected {expected}, found {found}")]
    TypeMismatch {
        row: usize,
        column: String,
        expected: DataType,
        found: &'static str,
    },

    /// Null in a column declared non-nullable
    #[error("Row {row}, column '{column}' must not be null")]
    NullValue { row: usize, column: String },

    /// Column declared twice
    #[error("Duplicate column: {0}")]
    DuplicateColumn(String),

    /// Batches with different schemas cannot be combined
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A JSON record could not be coerced into the schema
    #[error("Invalid record {row}: {reason}")]
    InvalidRecord { row: usize, reason: String },
}

/// Declared type of a batch column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Integer,
    Float,
    Date,
    DateTime,
}

impl DataType {
    /// Check whether a value may be stored in a column of this type
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (DataType::String, Value::String(_))
                | (DataType::Integer, Value::Integer(_))
                | (DataType::Float, Value::Float(_))
                | (DataType::Float, Value::Integer(_))
                | (DataType::Date, Value::Date(_))
                | (DataType::DateTime, Value::DateTime(_))
                | (DataType::DateTime, Value::Date(_))
        )
    }

    /// Check if the type is date-valued
    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Date | DataType::DateTime)
    }

    /// Convert an accepted value to this type's canonical variant
    ///
    /// Integers in a float column become floats, so `5` and `5.0` are one
    /// value once they sit in the same column.
    pub fn coerce(&self, value: Value) -> Value {
        match (self, value) {
            (DataType::Float, Value::Integer(i)) => Value::Float(i as f64),
            (_, other) => other,
        }
    }
}

impl std::str::FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" | "str" | "text" => Ok(DataType::String),
            "int" | "integer" => Ok(DataType::Integer),
            "float" | "double" | "number" => Ok(DataType::Float),
            "date" => Ok(DataType::Date),
            "datetime" | "timestamp" => Ok(DataType::DateTime),
            _ => Err(format!("Unknown column type: {}", s)),
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::String => write!(f, "string"),
            DataType::Integer => write!(f, "integer"),
            DataType::Float => write!(f, "float"),
            DataType::Date => write!(f, "date"),
            DataType::DateTime => write!(f, "datetime"),
        }
    }
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    /// Create a nullable column
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    /// Create a column that rejects nulls
    pub fn required(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: false,
        }
    }
}

/// Ordered set of column definitions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<ColumnDef>,
}

impl Schema {
    /// Create a schema, rejecting duplicate column names
    pub fn new(columns: Vec<ColumnDef>) -> Result<Self, BatchError> {
        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(BatchError::DuplicateColumn(col.name.clone()));
            }
        }
        Ok(Self { columns })
    }

    /// Column definitions in declaration order
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Column names in declaration order
    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Look up a column definition by name
    pub fn get(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check if a column is declared
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if the schema has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Names from `required` that are not declared
    pub fn missing<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut missing: Vec<String> = Vec::new();
        for name in required {
            if !self.contains(name) && !missing.iter().any(|m| m == name) {
                missing.push(name.to_string());
            }
        }
        missing
    }
}

/// One row of a batch, keyed by column name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    /// Create an empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    /// Get a value by column name
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// Set a value
    pub fn insert(&mut self, column: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(column.into(), value)
    }

    /// Remove a value
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.0.remove(column)
    }

    /// Iterate column/value pairs
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of values
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the row has no values
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// An ordered, schema-validated sequence of rows
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TabularBatch {
    schema: Schema,
    rows: Vec<Row>,
}

impl TabularBatch {
    /// Create an empty batch with the given schema
    pub fn empty(schema: Schema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    /// Create a batch, validating every row against the schema
    pub fn from_rows(schema: Schema, mut rows: Vec<Row>) -> Result<Self, BatchError> {
        for (idx, row) in rows.iter_mut().enumerate() {
            validate_row(&schema, row, idx)?;
            coerce_row(&schema, row);
        }
        Ok(Self { schema, rows })
    }

    /// Build a batch from JSON objects, coercing values to the schema types
    ///
    /// Keys absent from a record become null; keys not in the schema are
    /// rejected.
    pub fn from_json_records(
        schema: Schema,
        records: &[serde_json::Value],
    ) -> Result<Self, BatchError> {
        let mut rows = Vec::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            let obj = record.as_object().ok_or_else(|| BatchError::InvalidRecord {
                row: idx,
                reason: "record is not a JSON object".to_string(),
            })?;
            if let Some(extra) = obj.keys().find(|k| !schema.contains(k)) {
                return Err(BatchError::UnexpectedColumn {
                    row: idx,
                    column: extra.clone(),
                });
            }
            let mut row = Row::new();
            for col in schema.columns() {
                let raw = obj.get(&col.name).unwrap_or(&serde_json::Value::Null);
                let value = coerce_json(raw, col.data_type).map_err(|reason| {
                    BatchError::InvalidRecord {
                        row: idx,
                        reason: format!("column '{}': {}", col.name, reason),
                    }
                })?;
                row.insert(col.name.clone(), value);
            }
            rows.push(row);
        }
        Self::from_rows(schema, rows)
    }

    /// Batch schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Batch rows
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Consume the batch, returning schema and rows
    pub fn into_parts(self) -> (Schema, Vec<Row>) {
        (self.schema, self.rows)
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the batch has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Check if a column is declared
    pub fn has_column(&self, name: &str) -> bool {
        self.schema.contains(name)
    }

    /// Fail with [`BatchError::MissingColumns`] unless every name is declared
    pub fn require_columns<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), BatchError> {
        let missing = self.schema.missing(names);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(BatchError::MissingColumns(missing))
        }
    }

    /// All values of one column in row order
    pub fn column_values(&self, name: &str) -> Result<Vec<&Value>, BatchError> {
        self.require_columns([name])?;
        Ok(self
            .rows
            .iter()
            .map(|r| r.get(name).unwrap_or(&Value::Null))
            .collect())
    }

    /// Rename columns; names not in `renames` are kept
    pub fn rename_columns(self, renames: &HashMap<String, String>) -> Result<Self, BatchError> {
        let columns: Vec<ColumnDef> = self
            .schema
            .columns
            .into_iter()
            .map(|mut c| {
                if let Some(new_name) = renames.get(&c.name) {
                    c.name = new_name.clone();
                }
                c
            })
            .collect();
        let schema = Schema::new(columns)?;
        let rows = self
            .rows
            .into_iter()
            .map(|row| {
                row.0
                    .into_iter()
                    .map(|(k, v)| match renames.get(&k) {
                        Some(new_name) => (new_name.clone(), v),
                        None => (k, v),
                    })
                    .collect::<Row>()
            })
            .collect();
        Ok(Self { schema, rows })
    }

    /// Drop the named columns; undeclared names are ignored
    pub fn drop_columns(mut self, names: &[String]) -> Self {
        self.schema.columns.retain(|c| !names.contains(&c.name));
        for row in &mut self.rows {
            for name in names {
                row.remove(name);
            }
        }
        self
    }

    /// Append a column with one value per row
    pub fn push_column(mut self, def: ColumnDef, values: Vec<Value>) -> Result<Self, BatchError> {
        if self.schema.contains(&def.name) {
            return Err(BatchError::DuplicateColumn(def.name));
        }
        if values.len() != self.rows.len() {
            return Err(BatchError::SchemaMismatch(format!(
                "column '{}' has {} values for {} rows",
                def.name,
                values.len(),
                self.rows.len()
            )));
        }
        for (idx, value) in values.iter().enumerate() {
            check_value(&def, value, idx)?;
        }
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.insert(def.name.clone(), def.data_type.coerce(value));
        }
        self.schema.columns.push(def);
        Ok(self)
    }

    /// Replace the type and values of an existing column
    pub fn replace_column(
        mut self,
        def: ColumnDef,
        values: Vec<Value>,
    ) -> Result<Self, BatchError> {
        let pos = self
            .schema
            .columns
            .iter()
            .position(|c| c.name == def.name)
            .ok_or_else(|| BatchError::MissingColumns(vec![def.name.clone()]))?;
        if values.len() != self.rows.len() {
            return Err(BatchError::SchemaMismatch(format!(
                "column '{}' has {} values for {} rows",
                def.name,
                values.len(),
                self.rows.len()
            )));
        }
        for (idx, value) in values.iter().enumerate() {
            check_value(&def, value, idx)?;
        }
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.insert(def.name.clone(), def.data_type.coerce(value));
        }
        self.schema.columns[pos] = def;
        Ok(self)
    }

    /// Keep only rows matching the predicate
    pub fn filter(mut self, pred: impl Fn(&Row) -> bool) -> Self {
        self.rows.retain(|r| pred(r));
        self
    }

    /// Append the rows of another batch with an identical schema
    pub fn append(&mut self, other: TabularBatch) -> Result<(), BatchError> {
        if self.schema.names() != other.schema.names() {
            return Err(BatchError::SchemaMismatch(format!(
                "expected columns [{}], found [{}]",
                self.schema.names().join(", "),
                other.schema.names().join(", ")
            )));
        }
        for (mine, theirs) in self.schema.columns.iter().zip(other.schema.columns.iter()) {
            if mine.data_type != theirs.data_type {
                return Err(BatchError::SchemaMismatch(format!(
                    "column '{}' is {} here but {} in the appended batch",
                    mine.name, mine.data_type, theirs.data_type
                )));
            }
        }
        self.rows.extend(other.rows);
        Ok(())
    }
}

fn check_value(def: &ColumnDef, value: &Value, row: usize) -> Result<(), BatchError> {
    if value.is_null() && !def.nullable {
        return Err(BatchError::NullValue {
            row,
            column: def.name.clone(),
        });
    }
    if !def.data_type.accepts(value) {
        return Err(BatchError::TypeMismatch {
            row,
            column: def.name.clone(),
            expected: def.data_type,
            found: value.type_name(),
        });
    }
    Ok(())
}

fn coerce_row(schema: &Schema, row: &mut Row) {
    for def in schema.columns() {
        if let Some(value) = row.0.get_mut(&def.name) {
            *value = def.data_type.coerce(std::mem::take(value));
        }
    }
}

fn validate_row(schema: &Schema, row: &Row, idx: usize) -> Result<(), BatchError> {
    if let Some((extra, _)) = row.iter().find(|(k, _)| !schema.contains(k)) {
        return Err(BatchError::UnexpectedColumn {
            row: idx,
            column: extra.clone(),
        });
    }
    for def in schema.columns() {
        let value = row.get(&def.name).ok_or_else(|| BatchError::IncompleteRow {
            row: idx,
            column: def.name.clone(),
        })?;
        check_value(def, value, idx)?;
    }
    Ok(())
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%Y/%m/%d"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d.%m.%Y %H:%M"];

fn parse_date(s: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
        .or_else(|| parse_datetime(s).map(|dt| dt.date()))
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
}

fn coerce_json(raw: &serde_json::Value, data_type: DataType) -> Result<Value, String> {
    use serde_json::Value as Json;

    if raw.is_null() {
        return Ok(Value::Null);
    }
    match (data_type, raw) {
        (DataType::String, Json::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Ok(Value::Null)
            } else {
                Ok(Value::String(trimmed.to_string()))
            }
        }
        (DataType::String, Json::Number(n)) => Ok(Value::String(n.to_string())),
        (DataType::Integer, Json::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 => Ok(Value::Integer(f as i64)),
                    _ => Err(format!("{} is not an integer", n)),
                }
            }
        }
        (DataType::Integer, Json::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|e| format!("'{}': {}", s, e)),
        (DataType::Float, Json::Number(n)) => n
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| format!("{} is not a float", n)),
        (DataType::Float, Json::String(s)) => s
            .trim()
            .replace(',', ".")
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| format!("'{}': {}", s, e)),
        (DataType::Date, Json::String(s)) => parse_date(s.trim())
            .map(Value::Date)
            .ok_or_else(|| format!("'{}' is not a date", s)),
        (DataType::DateTime, Json::String(s)) => {
            let s = s.trim();
            parse_datetime(s)
                .map(Value::DateTime)
                .or_else(|| parse_date(s).map(Value::Date))
                .ok_or_else(|| format!("'{}' is not a timestamp", s))
        }
        (expected, other) => Err(format!("cannot read {} as {}", other, expected)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn location_schema() -> Schema {
        Schema::new(vec![
            ColumnDef::new("region", DataType::String),
            ColumnDef::new("settlement", DataType::String),
            ColumnDef::new("visitors", DataType::Integer),
        ])
        .unwrap()
    }

    #[test]
    fn test_from_rows_rejects_unexpected_column() {
        let row = Row::new()
            .with("region", "North")
            .with("settlement", "Lake")
            .with("visitors", 3)
            .with("extra", "x");
        let err = TabularBatch::from_rows(location_schema(), vec![row]).unwrap_err();
        assert!(matches!(err, BatchError::UnexpectedColumn { column, .. } if column == "extra"));
    }

    #[test]
    fn test_from_rows_rejects_type_mismatch() {
        let row = Row::new()
            .with("region", "North")
            .with("settlement", "Lake")
            .with("visitors", "many");
        let err = TabularBatch::from_rows(location_schema(), vec![row]).unwrap_err();
        assert!(matches!(err, BatchError::TypeMismatch { .. }));
    }

    #[test]
    fn test_integers_in_float_column_become_floats() {
        let schema = Schema::new(vec![ColumnDef::new("rate", DataType::Float)]).unwrap();
        let batch = TabularBatch::from_rows(
            schema,
            vec![
                Row::new().with("rate", 5),
                Row::new().with("rate", Value::Float(5.0)),
            ],
        )
        .unwrap();
        assert_eq!(batch.rows()[0].get("rate"), Some(&Value::Float(5.0)));
        assert_eq!(batch.rows()[0], batch.rows()[1]);

        let batch = batch
            .push_column(
                ColumnDef::new("weight", DataType::Float),
                vec![Value::Integer(2), Value::Null],
            )
            .unwrap();
        assert_eq!(batch.rows()[0].get("weight"), Some(&Value::Float(2.0)));
        assert_eq!(batch.rows()[1].get("weight"), Some(&Value::Null));
    }

    #[test]
    fn test_required_column_rejects_null() {
        let schema = Schema::new(vec![ColumnDef::required("id", DataType::Integer)]).unwrap();
        let err =
            TabularBatch::from_rows(schema, vec![Row::new().with("id", Value::Null)]).unwrap_err();
        assert!(matches!(err, BatchError::NullValue { .. }));
    }

    #[test]
    fn test_duplicate_schema_column() {
        let err = Schema::new(vec![
            ColumnDef::new("a", DataType::String),
            ColumnDef::new("a", DataType::Integer),
        ])
        .unwrap_err();
        assert_eq!(err, BatchError::DuplicateColumn("a".to_string()));
    }

    #[test]
    fn test_rename_and_drop() {
        let row = Row::new()
            .with("region", "North")
            .with("settlement", "Lake")
            .with("visitors", 3);
        let batch = TabularBatch::from_rows(location_schema(), vec![row]).unwrap();

        let renames = HashMap::from([("visitors".to_string(), "guests".to_string())]);
        let batch = batch
            .rename_columns(&renames)
            .unwrap()
            .drop_columns(&["settlement".to_string()]);

        assert_eq!(batch.schema().names(), vec!["region", "guests"]);
        assert_eq!(batch.rows()[0].get("guests"), Some(&Value::Integer(3)));
        assert!(batch.rows()[0].get("settlement").is_none());
    }

    #[test]
    fn test_append_requires_same_schema() {
        let mut a = TabularBatch::empty(location_schema());
        let b = TabularBatch::empty(
            Schema::new(vec![ColumnDef::new("region", DataType::String)]).unwrap(),
        );
        assert!(matches!(a.append(b), Err(BatchError::SchemaMismatch(_))));
    }

    #[test]
    fn test_from_json_records_coerces_types() {
        let schema = Schema::new(vec![
            ColumnDef::new("name", DataType::String),
            ColumnDef::new("count", DataType::Integer),
            ColumnDef::new("held_on", DataType::Date),
            ColumnDef::new("started_at", DataType::DateTime),
        ])
        .unwrap();
        let records = vec![json!({
            "name": "  Spring fair ",
            "count": 12.0,
            "held_on": "07.03.2024",
            "started_at": "2024-03-07T10:30:00Z"
        })];

        let batch = TabularBatch::from_json_records(schema, &records).unwrap();
        let row = &batch.rows()[0];
        assert_eq!(row.get("name"), Some(&Value::from("Spring fair")));
        assert_eq!(row.get("count"), Some(&Value::Integer(12)));
        assert_eq!(
            row.get("held_on"),
            Some(&Value::Date(NaiveDate::from_ymd_opt(2024, 3, 7).unwrap()))
        );
        assert!(matches!(row.get("started_at"), Some(Value::DateTime(_))));
    }

    #[test]
    fn test_from_json_records_missing_key_is_null() {
        let schema = Schema::new(vec![
            ColumnDef::new("name", DataType::String),
            ColumnDef::new("count", DataType::Integer),
        ])
        .unwrap();
        let batch = TabularBatch::from_json_records(schema, &[json!({"name": "x"})]).unwrap();
        assert_eq!(batch.rows()[0].get("count"), Some(&Value::Null));
    }

    #[test]
    fn test_data_type_from_str() {
        assert_eq!("int".parse::<DataType>().unwrap(), DataType::Integer);
        assert_eq!("TIMESTAMP".parse::<DataType>().unwrap(), DataType::DateTime);
        assert!("blob".parse::<DataType>().is_err());
    }
}
