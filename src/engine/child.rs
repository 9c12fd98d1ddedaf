//! One-to-many expansion of delimited columns into child records

use super::error::{LoadError, LoadResult};
use super::resolver::{DimensionResolver, ResolveStats};
use crate::models::{ChildSpec, ColumnDef, DataType, Row, Schema, TabularBatch, Value};
use crate::store::KeyStore;
use tracing::{debug, info};

/// Split a multi-valued cell into trimmed, non-empty tokens
///
/// Null yields no tokens; non-text values are rendered as text first.
pub fn split_tokens(value: &Value, delimiters: &[char]) -> Vec<String> {
    let text = match value {
        Value::Null => return Vec::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    text.split(|c: char| delimiters.contains(&c))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Build one child record per token of `spec.source_column`
///
/// Each record carries the token under `item_column`, the type value,
/// the copied fact columns and the fact key under `fact_key_column`.
pub fn expand_children(
    batch: &TabularBatch,
    spec: &ChildSpec,
    fact_key_column: &str,
) -> LoadResult<TabularBatch> {
    let mut columns = vec![ColumnDef::required(spec.item_column.clone(), DataType::String)];
    let mut carried: Vec<String> = Vec::new();

    let sources = spec
        .type_column
        .iter()
        .chain(spec.copy_columns.iter())
        .filter(|c| *c != &spec.item_column);
    for source in sources {
        let def = batch.schema().get(source).ok_or_else(|| LoadError::MappingIncomplete {
            table: spec.link.table.clone(),
            missing: vec![source.clone()],
        })?;
        if carried.contains(source) {
            continue;
        }
        columns.push(def.clone());
        carried.push(source.clone());
    }
    columns.push(ColumnDef::required(fact_key_column, DataType::Integer));

    if !batch.has_column(&spec.source_column) {
        return Err(LoadError::MappingIncomplete {
            table: spec.link.table.clone(),
            missing: vec![spec.source_column.clone()],
        });
    }
    if !batch.has_column(fact_key_column) {
        return Err(LoadError::MappingIncomplete {
            table: spec.link.table.clone(),
            missing: vec![fact_key_column.to_string()],
        });
    }

    let schema = Schema::new(columns)?;
    let mut rows = Vec::new();
    for (idx, row) in batch.rows().iter().enumerate() {
        let fact_key = row.get(fact_key_column).cloned().unwrap_or_default();
        if fact_key.is_null() {
            return Err(LoadError::NullKey {
                table: spec.link.table.clone(),
                column: fact_key_column.to_string(),
                row: idx,
            });
        }
        let source = row.get(&spec.source_column).unwrap_or(&Value::Null);
        for token in split_tokens(source, &spec.delimiters) {
            let mut child = Row::new().with(spec.item_column.clone(), token);
            for column in &carried {
                child.insert(column.clone(), row.get(column).cloned().unwrap_or_default());
            }
            child.insert(fact_key_column, fact_key.clone());
            rows.push(child);
        }
    }

    Ok(TabularBatch::from_rows(schema, rows)?)
}

/// Result of loading one child expansion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChildLoad {
    /// Child records derived from the fact rows
    pub children: usize,
    /// Linking rows written
    pub links: u64,
    /// Child dimension resolution counters
    pub dimension: ResolveStats,
}

/// Expand, resolve the child dimension and write linking rows
pub async fn load_children<S: KeyStore + ?Sized>(
    store: &S,
    batch: &TabularBatch,
    spec: &ChildSpec,
    fact_key_column: &str,
) -> LoadResult<ChildLoad> {
    let children = expand_children(batch, spec, fact_key_column)?;
    let child_count = children.len();
    debug!(
        source = %spec.source_column,
        children = child_count,
        "expanded child records"
    );
    if child_count == 0 {
        return Ok(ChildLoad::default());
    }

    let resolved = DimensionResolver::new(store)
        .resolve(children, &spec.dimension)
        .await?;

    let child_key_column = spec.dimension.output_column();
    let mut link_rows = Vec::with_capacity(resolved.batch.len());
    for (idx, row) in resolved.batch.rows().iter().enumerate() {
        let fact_key = row.get(fact_key_column).cloned().unwrap_or_default();
        let child_key = row.get(child_key_column).cloned().unwrap_or_default();
        for (column, value) in [(fact_key_column, &fact_key), (child_key_column, &child_key)] {
            if value.is_null() {
                return Err(LoadError::NullKey {
                    table: spec.link.table.clone(),
                    column: column.to_string(),
                    row: idx,
                });
            }
        }
        link_rows.push(vec![child_key, fact_key]);
    }

    let link_columns = vec![spec.link.child_column.clone(), spec.link.fact_column.clone()];
    let links = store
        .append(&spec.link.table, &link_columns, &link_rows)
        .await
        .map_err(|e| LoadError::from_insert(&spec.link.table, e))?;
    info!(
        table = %spec.link.table,
        children = child_count,
        links,
        "linked child records"
    );

    Ok(ChildLoad {
        children: child_count,
        links,
        dimension: resolved.stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DimensionSpec, LinkSpec, NaturalKeySpec, DEFAULT_CHILD_DELIMITERS};
    use crate::store::{MemoryKeyStore, MemoryTable};

    fn spec() -> ChildSpec {
        ChildSpec {
            source_column: "participants".to_string(),
            item_column: "name".to_string(),
            type_column: Some("participant_type".to_string()),
            delimiters: DEFAULT_CHILD_DELIMITERS.to_vec(),
            copy_columns: vec!["region".to_string()],
            dimension: DimensionSpec::new(
                "dim_person",
                "person_id",
                NaturalKeySpec::identity(["name", "participant_type"]),
            ),
            link: LinkSpec {
                table: "link_event_person".to_string(),
                fact_column: "event_id".to_string(),
                child_column: "person_id".to_string(),
            },
        }
    }

    fn facts() -> TabularBatch {
        let schema = Schema::new(vec![
            ColumnDef::new("participants", DataType::String),
            ColumnDef::new("participant_type", DataType::String),
            ColumnDef::new("region", DataType::String),
            ColumnDef::required("event_id", DataType::Integer),
        ])
        .unwrap();
        TabularBatch::from_rows(
            schema,
            vec![
                Row::new()
                    .with("participants", "Alice, Bob;  ,Carol")
                    .with("participant_type", "Volunteer")
                    .with("region", "North")
                    .with("event_id", 1),
                Row::new()
                    .with("participants", Value::Null)
                    .with("participant_type", "Guest")
                    .with("region", "South")
                    .with("event_id", 2),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_split_tokens() {
        assert_eq!(
            split_tokens(&Value::from(" Alice ,Bob;;Carol "), &[',', ';']),
            vec!["Alice", "Bob", "Carol"]
        );
        assert!(split_tokens(&Value::Null, &[',']).is_empty());
        assert!(split_tokens(&Value::from(" , "), &[',']).is_empty());
    }

    #[test]
    fn test_expand_children() {
        let children = expand_children(&facts(), &spec(), "event_id").unwrap();
        assert_eq!(children.len(), 3);
        assert_eq!(
            children.schema().names(),
            vec!["name", "participant_type", "region", "event_id"]
        );
        let bob = &children.rows()[1];
        assert_eq!(bob.get("name"), Some(&Value::from("Bob")));
        assert_eq!(bob.get("participant_type"), Some(&Value::from("Volunteer")));
        assert_eq!(bob.get("event_id"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_expand_requires_source_column() {
        let mut spec = spec();
        spec.source_column = "attendees".to_string();
        let err = expand_children(&facts(), &spec, "event_id").unwrap_err();
        assert!(matches!(err, LoadError::MappingIncomplete { .. }));
    }

    fn store() -> MemoryKeyStore {
        MemoryKeyStore::new()
            .with_table(MemoryTable::new("dim_person", "person_id"))
            .with_table(MemoryTable::keyless("link_event_person"))
    }

    #[tokio::test]
    async fn test_null_fact_key_fails_before_any_write() {
        let schema = Schema::new(vec![
            ColumnDef::new("participants", DataType::String),
            ColumnDef::new("participant_type", DataType::String),
            ColumnDef::new("region", DataType::String),
            ColumnDef::new("event_id", DataType::Integer),
        ])
        .unwrap();
        let batch = TabularBatch::from_rows(
            schema,
            vec![
                Row::new()
                    .with("participants", "Alice")
                    .with("participant_type", "Volunteer")
                    .with("region", "North")
                    .with("event_id", 1),
                Row::new()
                    .with("participants", "Bob")
                    .with("participant_type", "Guest")
                    .with("region", "South")
                    .with("event_id", Value::Null),
            ],
        )
        .unwrap();

        let err = expand_children(&batch, &spec(), "event_id").unwrap_err();
        assert_eq!(
            err,
            LoadError::NullKey {
                table: "link_event_person".to_string(),
                column: "event_id".to_string(),
                row: 1,
            }
        );

        let store = store();
        let err = load_children(&store, &batch, &spec(), "event_id")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LoadError::NullKey { ref table, ref column, .. }
                if table == "link_event_person" && column == "event_id"
        ));
        assert_eq!(store.stats().inserts, 0);
        assert!(store.rows("link_event_person").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_null_child_key_fails_before_linking() {
        // A dimension without natural-key columns yields no child key
        let mut spec = spec();
        spec.dimension = DimensionSpec::new("dim_person", "person_id", NaturalKeySpec::new(vec![]));

        let store = store();
        let err = load_children(&store, &facts(), &spec, "event_id")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LoadError::NullKey {
                table: "link_event_person".to_string(),
                column: "person_id".to_string(),
                row: 0,
            }
        );
        assert_eq!(store.stats().inserts, 0);
        assert!(store.rows("link_event_person").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_children_writes_one_link_per_token() {
        let store = store();
        let load = load_children(&store, &facts(), &spec(), "event_id")
            .await
            .unwrap();
        assert_eq!(load.children, 3);
        assert_eq!(load.links, 3);
        assert_eq!(store.rows("link_event_person").unwrap().len(), 3);
    }
}
