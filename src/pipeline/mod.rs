//! Activity pipeline
//!
//! Source documents arrive tagged with an activity code. Documents of one
//! activity are concatenated into a single batch, loaded through the
//! [`FactLoader`], and each document gets a [`Meta`] record describing
//! what happened to it.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::WarehouseCatalog;
use crate::engine::{FactLoader, LoadOutcome};
use crate::models::{
    ActivityKind, DataType, DocumentStatus, Meta, RowSetState, SurrogateKey, TabularBatch, TransitionError,
};
use crate::store::KeyStore;

/// Error type for pipeline bookkeeping
///
/// Load failures are not pipeline errors; they end up in the `Meta`
/// records of the affected documents.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// One source file's rows, already mapped to standard columns
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub document_id: String,
    /// Raw activity identifier as reported by the source
    pub activity: String,
    pub batch: TabularBatch,
}

impl SourceDocument {
    pub fn new(
        document_id: impl Into<String>,
        activity: impl Into<String>,
        batch: TabularBatch,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            activity: activity.into(),
            batch,
        }
    }
}

/// How a group of documents was dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dispatch {
    /// The group was loaded
    Loaded,
    /// Planning, concatenation or loading failed
    Failed,
    /// Unknown activity; documents left as `new`
    Skipped,
}

/// Result of processing one activity group
#[derive(Debug, Clone, PartialEq)]
pub struct GroupReport {
    pub activity: String,
    pub dispatch: Dispatch,
    /// One record per input document, in input order
    pub meta: Vec<Meta>,
    /// Distinct fact keys written or reused
    pub fact_keys: Vec<SurrogateKey>,
    pub state: RowSetState,
}

impl GroupReport {
    /// Documents with the given status
    pub fn count(&self, status: DocumentStatus) -> usize {
        self.meta.iter().filter(|m| m.status == status).count()
    }
}

/// Group documents by activity kind, keeping first-seen order
///
/// Codes and names of one kind (`"1"` and `"event"`) share a group, which
/// is labelled with the first raw identifier seen.
pub fn group_by_activity(documents: Vec<SourceDocument>) -> Vec<(String, Vec<SourceDocument>)> {
    let mut groups: Vec<(ActivityKind, String, Vec<SourceDocument>)> = Vec::new();
    for document in documents {
        let kind = ActivityKind::parse(&document.activity);
        match groups.iter_mut().find(|(k, _, _)| *k == kind) {
            Some((_, _, members)) => members.push(document),
            None => groups.push((kind, document.activity.clone(), vec![document])),
        }
    }
    groups
        .into_iter()
        .map(|(_, label, members)| (label, members))
        .collect()
}

/// Store and catalog shared by every group of one run
pub struct LoadContext<'a, S: KeyStore + ?Sized> {
    pub store: &'a S,
    pub catalog: &'a WarehouseCatalog,
}

impl<'a, S: KeyStore + ?Sized> LoadContext<'a, S> {
    pub fn new(store: &'a S, catalog: &'a WarehouseCatalog) -> Self {
        Self { store, catalog }
    }

    /// Group `documents` by activity and process each group in turn
    pub async fn run(&self, documents: Vec<SourceDocument>) -> Result<Vec<GroupReport>, PipelineError> {
        let mut reports = Vec::new();
        for (activity, group) in group_by_activity(documents) {
            reports.push(self.process_group(&activity, group).await?);
        }
        Ok(reports)
    }

    /// Load every document of one activity as a single batch
    pub async fn process_group(
        &self,
        raw_activity: &str,
        documents: Vec<SourceDocument>,
    ) -> Result<GroupReport, PipelineError> {
        let kind = ActivityKind::parse(raw_activity);
        match &kind {
            ActivityKind::Event | ActivityKind::Project | ActivityKind::Volunteering => {}
            ActivityKind::Unknown(raw) => {
                warn!(
                    activity = %raw,
                    documents = documents.len(),
                    "unknown activity kind, skipping"
                );
                return Ok(GroupReport {
                    activity: raw_activity.to_string(),
                    dispatch: Dispatch::Skipped,
                    meta: documents.iter().map(|d| Meta::new(&d.document_id)).collect(),
                    fact_keys: Vec::new(),
                    state: RowSetState::New,
                });
            }
        }

        let mut state = RowSetState::New;
        state.begin()?;

        let plan = match self.catalog.plan_for(&kind) {
            Ok(plan) => plan,
            Err(e) => {
                let reason = e.to_string();
                state.fail(reason.clone())?;
                return Ok(GroupReport {
                    activity: raw_activity.to_string(),
                    dispatch: Dispatch::Failed,
                    meta: documents
                        .iter()
                        .map(|d| Meta::error(&d.document_id, reason.clone()))
                        .collect(),
                    fact_keys: Vec::new(),
                    state,
                });
            }
        };

        let (batch, mut meta, contributors) = concatenate(documents);
        let Some(batch) = batch else {
            state.fail("no document contributed rows")?;
            return Ok(GroupReport {
                activity: raw_activity.to_string(),
                dispatch: Dispatch::Failed,
                meta,
                fact_keys: Vec::new(),
                state,
            });
        };

        let loaded: Result<LoadOutcome, _> = FactLoader::new(self.store)
            .load(batch, &plan.fact, &plan.dimensions)
            .await;
        let (dispatch, fact_keys) = match loaded {
            Ok(outcome) => {
                state.finish()?;
                for idx in &contributors {
                    meta[*idx] = Meta::processed(&meta[*idx].document_id);
                }
                info!(
                    activity = %kind,
                    documents = contributors.len(),
                    rows = outcome.fact_keys.len(),
                    "activity loaded"
                );
                (Dispatch::Loaded, outcome.distinct_fact_keys())
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(activity = %kind, error = %reason, "activity load failed");
                state.fail(reason.clone())?;
                for idx in &contributors {
                    meta[*idx] = Meta::error(&meta[*idx].document_id, reason.clone());
                }
                (Dispatch::Failed, Vec::new())
            }
        };

        Ok(GroupReport {
            activity: raw_activity.to_string(),
            dispatch,
            meta,
            fact_keys,
            state,
        })
    }
}

/// Concatenate the documents sharing the most common schema
///
/// Ties go to the schema seen first. Returns the combined batch, one
/// `Meta` per document (documents with another schema already marked
/// `error`) and the indices of contributing documents.
fn concatenate(documents: Vec<SourceDocument>) -> (Option<TabularBatch>, Vec<Meta>, Vec<usize>) {
    let signatures: Vec<Vec<(String, DataType)>> = documents
        .iter()
        .map(|d| {
            d.batch
                .schema()
                .columns()
                .iter()
                .map(|c| (c.name.clone(), c.data_type))
                .collect()
        })
        .collect();
    let majority = signatures
        .iter()
        .enumerate()
        .max_by_key(|&(idx, sig)| {
            let votes = signatures.iter().filter(|other| *other == sig).count();
            (votes, std::cmp::Reverse(idx))
        })
        .map(|(_, sig)| sig.clone());

    let mut combined: Option<TabularBatch> = None;
    let mut meta = Vec::with_capacity(documents.len());
    let mut contributors = Vec::new();

    for (idx, (document, signature)) in documents.into_iter().zip(&signatures).enumerate() {
        if majority.as_ref() != Some(signature) {
            let reason = match &combined {
                Some(batch) => format!(
                    "Schema mismatch: expected columns [{}], found [{}]",
                    batch.schema().names().join(", "),
                    document.batch.schema().names().join(", ")
                ),
                None => format!(
                    "Schema mismatch: columns [{}] differ from the group's common schema",
                    document.batch.schema().names().join(", ")
                ),
            };
            warn!(document = %document.document_id, error = %reason, "document not concatenated");
            meta.push(Meta::error(document.document_id, reason));
            continue;
        }
        let appended = match combined.as_mut() {
            None => {
                combined = Some(document.batch);
                Ok(())
            }
            Some(batch) => batch.append(document.batch),
        };
        match appended {
            Ok(()) => {
                meta.push(Meta::new(document.document_id));
                contributors.push(idx);
            }
            Err(e) => {
                warn!(document = %document.document_id, error = %e, "document not concatenated");
                meta.push(Meta::error(document.document_id, e.to_string()));
            }
        }
    }
    (combined, meta, contributors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnDef, Row, Schema};

    fn batch(names: &[&str]) -> TabularBatch {
        let schema = Schema::new(vec![ColumnDef::new("region", DataType::String)]).unwrap();
        let rows = names.iter().map(|n| Row::new().with("region", *n)).collect();
        TabularBatch::from_rows(schema, rows).unwrap()
    }

    #[test]
    fn test_group_by_activity_keeps_first_seen_order() {
        let docs = vec![
            SourceDocument::new("a", "2", batch(&["North"])),
            SourceDocument::new("b", "1", batch(&["South"])),
            SourceDocument::new("c", "2", batch(&["East"])),
        ];
        let groups = group_by_activity(docs);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "2");
        assert_eq!(
            groups[0].1.iter().map(|d| d.document_id.as_str()).collect::<Vec<_>>(),
            vec!["a", "c"]
        );
        assert_eq!(groups[1].0, "1");
    }

    #[test]
    fn test_codes_and_names_of_one_kind_share_a_group() {
        let docs = vec![
            SourceDocument::new("a", "1", batch(&["North"])),
            SourceDocument::new("b", "event", batch(&["South"])),
            SourceDocument::new("c", "42", batch(&["East"])),
            SourceDocument::new("d", " Event ", batch(&["West"])),
        ];
        let groups = group_by_activity(docs);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "1");
        assert_eq!(
            groups[0].1.iter().map(|d| d.document_id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "d"]
        );
        assert_eq!(groups[1].0, "42");
    }

    #[test]
    fn test_concatenate_excludes_incompatible_documents() {
        let other = TabularBatch::from_rows(
            Schema::new(vec![ColumnDef::new("city", DataType::String)]).unwrap(),
            vec![Row::new().with("city", "Lake")],
        )
        .unwrap();
        let docs = vec![
            SourceDocument::new("a", "1", batch(&["North"])),
            SourceDocument::new("b", "1", other),
            SourceDocument::new("c", "1", batch(&["South", "East"])),
        ];

        let (combined, meta, contributors) = concatenate(docs);
        assert_eq!(combined.unwrap().len(), 3);
        assert_eq!(contributors, vec![0, 2]);
        assert_eq!(meta[1].status, DocumentStatus::Error);
        assert_eq!(meta[0].status, DocumentStatus::New);
    }

    #[test]
    fn test_concatenate_prefers_the_most_common_schema() {
        let odd = || {
            TabularBatch::from_rows(
                Schema::new(vec![ColumnDef::new("city", DataType::String)]).unwrap(),
                vec![Row::new().with("city", "Lake")],
            )
            .unwrap()
        };
        let docs = vec![
            SourceDocument::new("a", "1", odd()),
            SourceDocument::new("b", "1", batch(&["North"])),
            SourceDocument::new("c", "1", batch(&["South"])),
        ];

        let (combined, meta, contributors) = concatenate(docs);
        let combined = combined.unwrap();
        assert_eq!(combined.schema().names(), vec!["region"]);
        assert_eq!(combined.len(), 2);
        assert_eq!(contributors, vec![1, 2]);
        assert_eq!(meta[0].status, DocumentStatus::Error);
        assert!(meta[0].reason.as_deref().unwrap().contains("Schema mismatch"));
        assert_eq!(meta[1].status, DocumentStatus::New);

        // Equal votes keep the schema seen first
        let docs = vec![
            SourceDocument::new("a", "1", odd()),
            SourceDocument::new("b", "1", batch(&["North"])),
        ];
        let (combined, _, contributors) = concatenate(docs);
        assert_eq!(combined.unwrap().schema().names(), vec!["city"]);
        assert_eq!(contributors, vec![0]);
    }
}
