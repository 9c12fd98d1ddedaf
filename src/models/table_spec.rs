//! Declarative descriptions of dimension, fact and linking tables

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Default delimiters for multi-valued child columns
pub const DEFAULT_CHILD_DELIMITERS: &[char] = &[',', ';'];

/// Mapping of a batch column onto a store column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Column name in the batch
    pub batch_column: String,
    /// Column name in the store table
    pub store_column: String,
}

impl ColumnMapping {
    pub fn new(batch_column: impl Into<String>, store_column: impl Into<String>) -> Self {
        Self {
            batch_column: batch_column.into(),
            store_column: store_column.into(),
        }
    }

    /// Map a column onto a store column of the same name
    pub fn identity(column: impl Into<String>) -> Self {
        let column = column.into();
        Self {
            batch_column: column.clone(),
            store_column: column,
        }
    }
}

/// Ordered list of columns that together identify one store row
///
/// Equality ignores order; rendering (SQL column lists, tuple layout)
/// follows declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NaturalKeySpec(Vec<ColumnMapping>);

impl NaturalKeySpec {
    pub fn new(columns: Vec<ColumnMapping>) -> Self {
        Self(columns)
    }

    /// Natural key whose batch and store names coincide
    pub fn identity<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self(columns.into_iter().map(ColumnMapping::identity).collect())
    }

    pub fn columns(&self) -> &[ColumnMapping] {
        &self.0
    }

    pub fn batch_columns(&self) -> Vec<String> {
        self.0.iter().map(|c| c.batch_column.clone()).collect()
    }

    pub fn store_columns(&self) -> Vec<String> {
        self.0.iter().map(|c| c.store_column.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for NaturalKeySpec {
    fn eq(&self, other: &Self) -> bool {
        let mine: HashSet<&ColumnMapping> = self.0.iter().collect();
        let theirs: HashSet<&ColumnMapping> = other.0.iter().collect();
        self.0.len() == other.0.len() && mine == theirs
    }
}

impl Eq for NaturalKeySpec {}

/// A dimension table resolved to surrogate keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSpec {
    /// Store table name
    pub table: String,
    /// Surrogate key column in the store
    pub key_column: String,
    /// Columns identifying a dimension row
    pub natural_key: NaturalKeySpec,
    /// Batch columns consumed by the dimension and written on insert
    ///
    /// Natural-key columns not listed here are still consumed and written.
    #[serde(default)]
    pub target_columns: Vec<ColumnMapping>,
    /// Output name for the key column; defaults to `key_column`
    #[serde(default)]
    pub alias: Option<String>,
}

impl DimensionSpec {
    pub fn new(
        table: impl Into<String>,
        key_column: impl Into<String>,
        natural_key: NaturalKeySpec,
    ) -> Self {
        Self {
            table: table.into(),
            key_column: key_column.into(),
            natural_key,
            target_columns: Vec::new(),
            alias: None,
        }
    }

    /// Add non-key attribute columns written on insert
    pub fn with_targets(mut self, targets: Vec<ColumnMapping>) -> Self {
        self.target_columns = targets;
        self
    }

    /// Rename the key column in the output batch
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Name of the key column in the output batch
    pub fn output_column(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.key_column)
    }

    /// All consumed columns: natural key first, then remaining targets
    pub fn consumed_columns(&self) -> Vec<ColumnMapping> {
        let mut columns: Vec<ColumnMapping> = self.natural_key.columns().to_vec();
        for target in &self.target_columns {
            if !columns
                .iter()
                .any(|c| c.batch_column == target.batch_column)
            {
                columns.push(target.clone());
            }
        }
        columns
    }
}

/// Linking table between a fact and a child dimension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpec {
    /// Store table name
    pub table: String,
    /// Column referencing the fact key
    pub fact_column: String,
    /// Column referencing the child dimension key
    pub child_column: String,
}

/// One-to-many expansion of a delimited column into child records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSpec {
    /// Multi-valued batch column, e.g. a comma separated name list
    pub source_column: String,
    /// Column name each split token is stored under in the child records
    pub item_column: String,
    /// Companion column whose value is copied onto every child
    #[serde(default)]
    pub type_column: Option<String>,
    /// Token separators
    #[serde(default = "default_delimiters")]
    pub delimiters: Vec<char>,
    /// Fact columns copied onto every child record
    #[serde(default)]
    pub copy_columns: Vec<String>,
    /// Dimension the child records resolve against
    pub dimension: DimensionSpec,
    /// Linking table receiving `{child_key, fact_key}` rows
    pub link: LinkSpec,
}

fn default_delimiters() -> Vec<char> {
    DEFAULT_CHILD_DELIMITERS.to_vec()
}

impl ChildSpec {
    /// Batch columns owned by this expansion and kept out of the fact insert
    pub fn owned_columns(&self) -> Vec<String> {
        let mut owned = vec![self.source_column.clone()];
        if let Some(type_column) = &self.type_column {
            owned.push(type_column.clone());
        }
        owned
    }
}

/// A fact table loaded by lookup-or-insert on its own natural key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactSpec {
    /// Store table name
    pub table: String,
    /// Surrogate key column in the store
    pub key_column: String,
    /// Natural key, usually resolved dimension ids plus a discriminator
    pub natural_key: NaturalKeySpec,
    /// Batch-to-store renames for fact columns; unlisted columns keep their name
    #[serde(default)]
    pub column_map: BTreeMap<String, String>,
    /// One-to-many child expansions
    #[serde(default)]
    pub child_specs: Vec<ChildSpec>,
}

impl FactSpec {
    pub fn new(
        table: impl Into<String>,
        key_column: impl Into<String>,
        natural_key: NaturalKeySpec,
    ) -> Self {
        Self {
            table: table.into(),
            key_column: key_column.into(),
            natural_key,
            column_map: BTreeMap::new(),
            child_specs: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: ChildSpec) -> Self {
        self.child_specs.push(child);
        self
    }

    /// Store column for a batch column
    pub fn store_column(&self, batch_column: &str) -> String {
        if let Some(nk) = self
            .natural_key
            .columns()
            .iter()
            .find(|c| c.batch_column == batch_column)
        {
            return nk.store_column.clone();
        }
        self.column_map
            .get(batch_column)
            .cloned()
            .unwrap_or_else(|| batch_column.to_string())
    }

    /// Batch columns owned by child expansions
    pub fn child_owned_columns(&self) -> Vec<String> {
        self.child_specs
            .iter()
            .flat_map(ChildSpec::owned_columns)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natural_key_equality_ignores_order() {
        let a = NaturalKeySpec::identity(["region", "municipality"]);
        let b = NaturalKeySpec::identity(["municipality", "region"]);
        let c = NaturalKeySpec::identity(["region"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.store_columns(), vec!["region", "municipality"]);
    }

    #[test]
    fn test_consumed_columns_merge_targets() {
        let spec = DimensionSpec::new(
            "dim_person",
            "person_id",
            NaturalKeySpec::new(vec![ColumnMapping::new("full_name", "name")]),
        )
        .with_targets(vec![
            ColumnMapping::new("full_name", "name"),
            ColumnMapping::new("participant_type", "role"),
        ]);

        let consumed = spec.consumed_columns();
        assert_eq!(consumed.len(), 2);
        assert_eq!(consumed[1].store_column, "role");
        assert_eq!(spec.output_column(), "person_id");
        assert_eq!(spec.with_alias("author_id").output_column(), "author_id");
    }

    #[test]
    fn test_fact_store_column() {
        let mut spec = FactSpec::new(
            "fact_event",
            "event_id",
            NaturalKeySpec::new(vec![
                ColumnMapping::identity("location_id"),
                ColumnMapping::new("title", "event_name"),
            ]),
        );
        spec.column_map
            .insert("guests".to_string(), "visitors".to_string());

        assert_eq!(spec.store_column("title"), "event_name");
        assert_eq!(spec.store_column("guests"), "visitors");
        assert_eq!(spec.store_column("location_id"), "location_id");
    }
}
