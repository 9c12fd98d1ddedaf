//! Fact loading: dimensions, then the fact table, then child links
//!
//! Insert order is dimensions -> fact -> children, so linking rows only
//! ever reference fact keys that already exist. Each insert commits on
//! its own; a failure later in the sequence leaves earlier inserts in
//! place, and rerunning the same batch reuses them through lookup.

use std::collections::HashSet;
use tracing::info;

use super::child::{ChildLoad, load_children};
use super::error::{LoadError, LoadResult};
use super::resolver::{DimensionResolver, KeyPlan, ResolveStats, require_columns};
use crate::models::{ColumnMapping, DimensionSpec, FactSpec, SurrogateKey, TabularBatch, Value};
use crate::store::KeyStore;

/// Everything a fact load produced
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    /// Input rows with dimension columns replaced by ids and the fact key added
    pub batch: TabularBatch,
    /// Fact key of every input row, in row order
    pub fact_keys: Vec<SurrogateKey>,
    /// Per-dimension counters, in resolution order
    pub dimensions: Vec<(String, ResolveStats)>,
    /// Fact table counters
    pub fact: ResolveStats,
    /// Per-child-expansion counters
    pub children: Vec<(String, ChildLoad)>,
}

impl LoadOutcome {
    /// Distinct fact keys written or reused, in first-seen order
    pub fn distinct_fact_keys(&self) -> Vec<SurrogateKey> {
        let mut seen = HashSet::new();
        self.fact_keys
            .iter()
            .copied()
            .filter(|k| seen.insert(*k))
            .collect()
    }

    /// Total linking rows written
    pub fn links_written(&self) -> u64 {
        self.children.iter().map(|(_, c)| c.links).sum()
    }
}

/// Loads a batch into a fact table and everything it references
pub struct FactLoader<'a, S: KeyStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: KeyStore + ?Sized> FactLoader<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Resolve `dimensions` in order, load the fact rows, then child links
    ///
    /// The fact row carries every remaining batch column except the
    /// columns owned by child expansions.
    pub async fn load(
        &self,
        batch: TabularBatch,
        fact: &FactSpec,
        dimensions: &[DimensionSpec],
    ) -> LoadResult<LoadOutcome> {
        if batch.is_empty() {
            return Err(LoadError::EmptyBatch(fact.table.clone()));
        }

        let resolver = DimensionResolver::new(self.store);
        let mut running = batch;
        let mut dimension_stats = Vec::with_capacity(dimensions.len());
        for spec in dimensions {
            let resolution = resolver.resolve(running, spec).await?;
            dimension_stats.push((spec.table.clone(), resolution.stats));
            running = resolution.batch;
        }

        require_columns(
            &running,
            &fact.table,
            fact.natural_key
                .columns()
                .iter()
                .map(|c| c.batch_column.as_str()),
        )?;
        if fact.natural_key.is_empty() {
            return Err(LoadError::InvalidSpec {
                table: fact.table.clone(),
                reason: "fact table needs a natural key".to_string(),
            });
        }
        if running.has_column(&fact.key_column) {
            return Err(LoadError::InvalidSpec {
                table: fact.table.clone(),
                reason: format!("batch already has a '{}' column", fact.key_column),
            });
        }
        check_dimension_ids(&running, fact, dimensions)?;

        let owned = fact.child_owned_columns();
        let columns: Vec<ColumnMapping> = running
            .schema()
            .names()
            .into_iter()
            .filter(|name| !owned.contains(name))
            .map(|name| {
                let store_column = fact.store_column(&name);
                ColumnMapping::new(name, store_column)
            })
            .collect();

        let plan = KeyPlan {
            table: &fact.table,
            key_column: &fact.key_column,
            natural_key: &fact.natural_key,
            columns,
            output_column: &fact.key_column,
            drop_consumed: false,
        };
        let resolution = resolver.lookup_or_insert(running, &plan).await?;

        let mut children = Vec::with_capacity(fact.child_specs.len());
        for child in &fact.child_specs {
            let loaded =
                load_children(self.store, &resolution.batch, child, &fact.key_column).await?;
            children.push((child.link.table.clone(), loaded));
        }

        let outcome = LoadOutcome {
            batch: resolution.batch,
            fact_keys: resolution.row_keys,
            dimensions: dimension_stats,
            fact: resolution.stats,
            children,
        };
        info!(
            table = %fact.table,
            rows = outcome.fact_keys.len(),
            inserted = outcome.fact.inserted,
            links = outcome.links_written(),
            "loaded facts"
        );
        Ok(outcome)
    }
}

/// A fact's natural key must not contain a null dimension id
fn check_dimension_ids(
    batch: &TabularBatch,
    fact: &FactSpec,
    dimensions: &[DimensionSpec],
) -> LoadResult<()> {
    let id_columns: Vec<&str> = fact
        .natural_key
        .columns()
        .iter()
        .map(|c| c.batch_column.as_str())
        .filter(|c| dimensions.iter().any(|d| d.output_column() == *c))
        .collect();

    for (row, values) in batch.rows().iter().enumerate() {
        for column in &id_columns {
            if values.get(column).unwrap_or(&Value::Null).is_null() {
                return Err(LoadError::NullKey {
                    table: fact.table.clone(),
                    column: column.to_string(),
                    row,
                });
            }
        }
    }
    Ok(())
}
