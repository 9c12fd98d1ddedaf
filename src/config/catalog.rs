//! Warehouse catalog
//!
//! Two YAML files describe a warehouse:
//!
//! `mapping.yaml` maps each standard batch column onto its store column:
//!
//! ```yaml
//! region:
//!   type: string
//!   db_field: region
//!   db_table: dim_location
//!   matches: ["Регион", "Region name"]
//! ```
//!
//! `schema.yaml` declares dimension and fact tables and, per activity,
//! which fact the activity loads and which dimensions it resolves first:
//!
//! ```yaml
//! dimensions:
//!   dim_location: { id: location_id, natural_key_columns: [region, settlement] }
//! facts:
//!   fact_event: { id: event_id, natural_key_columns: [location_id, title] }
//! activities:
//!   event:
//!     fact: fact_event
//!     dimensions: [dim_location, { table: dim_person, alias: organizer_id }]
//! ```
//!
//! Natural-key columns in `schema.yaml` are store column names. They are
//! mapped back to batch columns through `db_table`/`db_field`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::mapping::{ColumnMapper, MappingError};
use crate::models::{
    ActivityKind, ChildSpec, ColumnDef, ColumnMapping, DEFAULT_CHILD_DELIMITERS, DataType,
    DimensionSpec, FactSpec, LinkSpec, NaturalKeySpec, Schema, TabularBatch,
};

/// Error type for catalog loading and spec building
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown activity: {0}")]
    UnknownActivity(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Column '{column}': {reason}")]
    InvalidType { column: String, reason: String },

    /// A natural-key store column has no batch column mapped onto it
    #[error("Incomplete mapping for {table}: no batch column maps to {}", .columns.join(", "))]
    IncompleteMapping { table: String, columns: Vec<String> },

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Batch(#[from] crate::models::BatchError),
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// One standard batch column as described in `mapping.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    /// Type name, e.g. `string`, `integer`, `date`
    #[serde(rename = "type", default = "default_type")]
    pub data_type: String,
    /// Store column; defaults to the batch column name
    #[serde(default)]
    pub db_field: Option<String>,
    /// Store table the column belongs to
    #[serde(default)]
    pub db_table: Option<String>,
    /// Header aliases seen in source files
    #[serde(default)]
    pub matches: Vec<String>,
}

fn default_type() -> String {
    "string".to_string()
}

impl MappingEntry {
    fn store_column<'a>(&'a self, batch_column: &'a str) -> &'a str {
        self.db_field.as_deref().unwrap_or(batch_column)
    }

    fn belongs_to(&self, table: &str) -> bool {
        self.db_table.as_deref() == Some(table)
    }
}

/// Dimension or fact table declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    /// Surrogate key column
    pub id: String,
    /// Store columns forming the natural key
    #[serde(default)]
    pub natural_key_columns: Vec<String>,
}

/// Dimension reference inside an activity, optionally aliased
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DimensionRef {
    Table(String),
    Aliased { table: String, alias: Option<String> },
}

impl DimensionRef {
    pub fn table(&self) -> &str {
        match self {
            DimensionRef::Table(table) | DimensionRef::Aliased { table, .. } => table,
        }
    }

    pub fn alias(&self) -> Option<&str> {
        match self {
            DimensionRef::Table(_) => None,
            DimensionRef::Aliased { alias, .. } => alias.as_deref(),
        }
    }
}

/// Child expansion declared on an activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildEntry {
    pub source_column: String,
    pub item_column: String,
    #[serde(default)]
    pub type_column: Option<String>,
    #[serde(default)]
    pub delimiters: Option<Vec<char>>,
    #[serde(default)]
    pub copy_columns: Vec<String>,
    /// Child dimension table
    pub dimension: String,
    pub link: LinkSpec,
}

/// What one activity loads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub fact: String,
    #[serde(default)]
    pub dimensions: Vec<DimensionRef>,
    #[serde(default)]
    pub children: Vec<ChildEntry>,
}

/// Parsed `schema.yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarehouseSchema {
    #[serde(default)]
    pub dimensions: BTreeMap<String, TableEntry>,
    #[serde(default)]
    pub facts: BTreeMap<String, TableEntry>,
    /// Keyed by activity name or quoted numeric code
    #[serde(default)]
    pub activities: BTreeMap<String, ActivityEntry>,
}

/// Specs needed to load one activity
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityPlan {
    pub kind: ActivityKind,
    pub fact: FactSpec,
    /// Resolved in order before the fact
    pub dimensions: Vec<DimensionSpec>,
}

/// Column mapping plus warehouse schema
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarehouseCatalog {
    pub schema: WarehouseSchema,
    /// Standard batch column -> mapping entry
    pub mapping: BTreeMap<String, MappingEntry>,
}

impl WarehouseCatalog {
    /// Read `schema.yaml` and `mapping.yaml` from disk
    pub fn load(schema_path: &Path, mapping_path: &Path) -> CatalogResult<Self> {
        let read = |path: &Path| {
            std::fs::read_to_string(path).map_err(|e| {
                CatalogError::IoError(format!("Failed to read {}: {}", path.display(), e))
            })
        };
        Self::from_yaml(&read(schema_path)?, &read(mapping_path)?)
    }

    /// Parse both documents from strings
    pub fn from_yaml(schema_yaml: &str, mapping_yaml: &str) -> CatalogResult<Self> {
        let schema: WarehouseSchema = serde_yaml::from_str(schema_yaml)
            .map_err(|e| CatalogError::ParseError(format!("Failed to parse schema: {}", e)))?;
        let mapping: BTreeMap<String, MappingEntry> = serde_yaml::from_str(mapping_yaml)
            .map_err(|e| CatalogError::ParseError(format!("Failed to parse mapping: {}", e)))?;

        for (column, entry) in &mapping {
            entry
                .data_type
                .parse::<DataType>()
                .map_err(|reason| CatalogError::InvalidType {
                    column: column.clone(),
                    reason,
                })?;
        }
        Ok(Self { schema, mapping })
    }

    /// Batch column whose `db_table.db_field` is `table.store_column`
    fn batch_column_for(&self, table: &str, store_column: &str) -> Option<&str> {
        self.mapping
            .iter()
            .find(|(batch, entry)| entry.belongs_to(table) && entry.store_column(batch) == store_column)
            .map(|(batch, _)| batch.as_str())
    }

    /// Spec for a dimension table, optionally renaming its key column
    pub fn dimension_spec(&self, table: &str, alias: Option<&str>) -> CatalogResult<DimensionSpec> {
        let entry = self
            .schema
            .dimensions
            .get(table)
            .ok_or_else(|| CatalogError::UnknownTable(table.to_string()))?;

        let mut natural_key = Vec::with_capacity(entry.natural_key_columns.len());
        let mut unmapped = Vec::new();
        for store_column in &entry.natural_key_columns {
            match self.batch_column_for(table, store_column) {
                Some(batch) => natural_key.push(ColumnMapping::new(batch, store_column.clone())),
                None => unmapped.push(store_column.clone()),
            }
        }
        if !unmapped.is_empty() {
            return Err(CatalogError::IncompleteMapping {
                table: table.to_string(),
                columns: unmapped,
            });
        }

        let targets = self
            .mapping
            .iter()
            .filter(|(_, e)| e.belongs_to(table))
            .map(|(batch, e)| ColumnMapping::new(batch.clone(), e.store_column(batch)))
            .collect();

        let mut spec = DimensionSpec::new(table, entry.id.clone(), NaturalKeySpec::new(natural_key))
            .with_targets(targets);
        if let Some(alias) = alias {
            spec = spec.with_alias(alias);
        }
        Ok(spec)
    }

    /// Spec for a fact table without child expansions
    ///
    /// Natural-key columns without a mapping entry are taken to be
    /// resolved dimension ids and keep their name.
    pub fn fact_spec(&self, table: &str) -> CatalogResult<FactSpec> {
        let entry = self
            .schema
            .facts
            .get(table)
            .ok_or_else(|| CatalogError::UnknownTable(table.to_string()))?;

        let natural_key = entry
            .natural_key_columns
            .iter()
            .map(|store_column| match self.batch_column_for(table, store_column) {
                Some(batch) => ColumnMapping::new(batch, store_column.clone()),
                None => ColumnMapping::identity(store_column.clone()),
            })
            .collect();

        let mut spec = FactSpec::new(table, entry.id.clone(), NaturalKeySpec::new(natural_key));
        for (batch, mapping) in &self.mapping {
            let store_column = mapping.store_column(batch);
            if mapping.belongs_to(table) && store_column != batch {
                spec.column_map.insert(batch.clone(), store_column.to_string());
            }
        }
        Ok(spec)
    }

    /// Plan for a raw activity identifier (name or code)
    pub fn activity_plan(&self, raw: &str) -> CatalogResult<ActivityPlan> {
        self.plan_for(&ActivityKind::parse(raw))
    }

    /// Plan for an activity kind
    ///
    /// Matches `schema.yaml` activity keys by parsed kind, so `"1"` and
    /// `event` name the same activity.
    pub fn plan_for(&self, kind: &ActivityKind) -> CatalogResult<ActivityPlan> {
        let (_, activity) = self
            .schema
            .activities
            .iter()
            .find(|(key, _)| match kind {
                ActivityKind::Unknown(raw) => key.as_str() == raw.as_str(),
                known => ActivityKind::parse(key) == *known,
            })
            .ok_or_else(|| CatalogError::UnknownActivity(kind.to_string()))?;

        let dimensions = activity
            .dimensions
            .iter()
            .map(|d| self.dimension_spec(d.table(), d.alias()))
            .collect::<CatalogResult<Vec<_>>>()?;

        let mut fact = self.fact_spec(&activity.fact)?;
        for child in &activity.children {
            fact = fact.with_child(ChildSpec {
                source_column: child.source_column.clone(),
                item_column: child.item_column.clone(),
                type_column: child.type_column.clone(),
                delimiters: child
                    .delimiters
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CHILD_DELIMITERS.to_vec()),
                copy_columns: child.copy_columns.clone(),
                dimension: self.dimension_spec(&child.dimension, None)?,
                link: child.link.clone(),
            });
        }

        Ok(ActivityPlan {
            kind: kind.clone(),
            fact,
            dimensions,
        })
    }

    /// Typed schema for the given standard columns, in order
    pub fn schema_for<S: AsRef<str>>(&self, columns: &[S]) -> CatalogResult<Schema> {
        let defs = columns
            .iter()
            .map(|column| {
                let column = column.as_ref();
                let entry = self
                    .mapping
                    .get(column)
                    .ok_or_else(|| CatalogError::UnknownColumn(column.to_string()))?;
                let data_type = entry.data_type.parse::<DataType>().map_err(|reason| {
                    CatalogError::InvalidType {
                        column: column.to_string(),
                        reason,
                    }
                })?;
                Ok(ColumnDef::new(column, data_type))
            })
            .collect::<CatalogResult<Vec<_>>>()?;
        Ok(Schema::new(defs)?)
    }

    /// Typed batch from JSON records already keyed by standard columns
    pub fn batch_from_records(&self, records: &[serde_json::Value]) -> CatalogResult<TabularBatch> {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            if let Some(object) = record.as_object() {
                for key in object.keys() {
                    if !columns.contains(key) {
                        columns.push(key.clone());
                    }
                }
            }
        }
        let schema = self.schema_for(&columns)?;
        Ok(TabularBatch::from_json_records(schema, records)?)
    }

    /// Header mapper built from every entry's `matches`
    pub fn mapper(&self, threshold: f64) -> CatalogResult<ColumnMapper> {
        let mapper = ColumnMapper::from_aliases(
            self.mapping
                .iter()
                .map(|(column, entry)| (column.clone(), entry.matches.clone())),
        )?;
        Ok(mapper.with_threshold(threshold)?)
    }
}
