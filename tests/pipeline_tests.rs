//! Activity pipeline tests against an in-memory store

use dwh_loader::config::WarehouseCatalog;
use dwh_loader::models::{DocumentStatus, RowSetState, TabularBatch, Value};
use dwh_loader::pipeline::{Dispatch, LoadContext, SourceDocument};
use dwh_loader::store::{MemoryKeyStore, MemoryTable};
use serde_json::json;

const SCHEMA: &str = r#"
dimensions:
  dim_location:
    id: location_id
    natural_key_columns: [region, settlement]
  dim_date:
    id: date_id
    natural_key_columns: [date]
  dim_person:
    id: person_id
    natural_key_columns: [name, role]
facts:
  fact_event:
    id: event_id
    natural_key_columns: [location_id, date_id, event_name]
activities:
  "1":
    fact: fact_event
    dimensions: [dim_location, dim_date]
    children:
      - source_column: participants
        item_column: participant_name
        type_column: participant_type
        dimension: dim_person
        link: { table: link_event_person, fact_column: event_id, child_column: person_id }
"#;

const MAPPING: &str = r#"
region: { type: string, db_table: dim_location, matches: ["Регион"] }
settlement: { type: string, db_table: dim_location, matches: ["Населенный пункт"] }
event_date: { type: date, db_field: date, db_table: dim_date, matches: ["Дата"] }
title: { type: string, db_field: event_name, db_table: fact_event, matches: ["Название"] }
guests: { type: integer, db_table: fact_event }
participants: { type: string, matches: ["Участники"] }
participant_name: { type: string, db_field: name, db_table: dim_person }
participant_type: { type: string, db_field: role, db_table: dim_person }
"#;

fn catalog() -> WarehouseCatalog {
    WarehouseCatalog::from_yaml(SCHEMA, MAPPING).unwrap()
}

fn store() -> MemoryKeyStore {
    MemoryKeyStore::new()
        .with_table(MemoryTable::new("dim_location", "location_id"))
        .with_table(MemoryTable::new("dim_person", "person_id"))
        .with_table(MemoryTable::new("fact_event", "event_id").unique(["location_id", "date_id", "event_name"]))
        .with_table(MemoryTable::keyless("link_event_person"))
}

fn document(id: &str, activity: &str, records: serde_json::Value) -> SourceDocument {
    let catalog = catalog();
    let records = catalog
        .mapper(0.8)
        .unwrap()
        .rename_records(records.as_array().unwrap().clone())
        .unwrap();
    let batch: TabularBatch = catalog.batch_from_records(&records).unwrap();
    SourceDocument::new(id, activity, batch)
}

fn event_records() -> serde_json::Value {
    json!([
        {
            "Регион": "North",
            "Населенный пункт": "Pine",
            "Дата": "2024-05-01",
            "Название": "Fair",
            "guests": 40,
            "Участники": "Alice, Bob",
            "participant_type": "Volunteer"
        },
        {
            "Регион": "North",
            "Населенный пункт": "Pine",
            "Дата": "01.05.2024",
            "Название": "Fair",
            "guests": 40,
            "Участники": "Carol",
            "participant_type": "Guest"
        }
    ])
}

#[tokio::test]
async fn test_group_loads_and_marks_documents_processed() {
    let store = store();
    let catalog = catalog();
    let context = LoadContext::new(&store, &catalog);

    let report = context
        .process_group("1", vec![document("doc-1", "1", event_records())])
        .await
        .unwrap();

    assert_eq!(report.dispatch, Dispatch::Loaded);
    assert_eq!(report.state, RowSetState::Loaded);
    assert_eq!(report.count(DocumentStatus::Processed), 1);
    // Both rows share location, date and title
    assert_eq!(report.fact_keys.len(), 1);

    let facts = store.rows("fact_event").unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].get("date_id"), Some(&Value::Integer(20240501)));
    assert_eq!(facts[0].get("event_name"), Some(&Value::from("Fair")));
    assert_eq!(store.rows("link_event_person").unwrap().len(), 3);
}

#[tokio::test]
async fn test_rerun_reuses_fact_keys() {
    let store = store();
    let catalog = catalog();
    let context = LoadContext::new(&store, &catalog);

    let first = context
        .process_group("event", vec![document("doc-1", "event", event_records())])
        .await
        .unwrap();
    let second = context
        .process_group("event", vec![document("doc-1", "event", event_records())])
        .await
        .unwrap();

    assert_eq!(second.dispatch, Dispatch::Loaded);
    assert_eq!(first.fact_keys, second.fact_keys);
    assert_eq!(store.rows("fact_event").unwrap().len(), 1);
    assert_eq!(store.rows("dim_person").unwrap().len(), 3);
}

#[tokio::test]
async fn test_run_groups_and_dispatches_each_activity() {
    let store = store();
    let catalog = catalog();
    let context = LoadContext::new(&store, &catalog);

    let incompatible = document("doc-2", "1", json!([{ "Регион": "South" }]));
    let docs = vec![
        document("doc-1", "1", event_records()),
        document("doc-x", "42", json!([{ "Регион": "East" }])),
        incompatible,
    ];

    let reports = context.run(docs).await.unwrap();
    assert_eq!(reports.len(), 2);

    let events = &reports[0];
    assert_eq!(events.activity, "1");
    assert_eq!(events.dispatch, Dispatch::Loaded);
    assert_eq!(events.meta[0].status, DocumentStatus::Processed);
    assert_eq!(events.meta[1].document_id, "doc-2");
    assert_eq!(events.meta[1].status, DocumentStatus::Error);
    assert!(events.meta[1].reason.as_deref().unwrap().contains("Schema mismatch"));

    let unknown = &reports[1];
    assert_eq!(unknown.dispatch, Dispatch::Skipped);
    assert_eq!(unknown.meta[0].status, DocumentStatus::New);
    assert_eq!(unknown.state, RowSetState::New);
}

#[tokio::test]
async fn test_load_error_marks_documents_error() {
    let store = store();
    let catalog = catalog();
    let context = LoadContext::new(&store, &catalog);

    // No settlement column: dim_location cannot be resolved
    let doc = document(
        "doc-1",
        "1",
        json!([{ "Регион": "North", "Дата": "2024-05-01", "Название": "Fair" }]),
    );
    let report = context.process_group("1", vec![doc]).await.unwrap();

    assert_eq!(report.dispatch, Dispatch::Failed);
    assert!(matches!(report.state, RowSetState::Error(_)));
    let reason = report.meta[0].reason.as_deref().unwrap();
    assert!(reason.contains("settlement"), "{}", reason);
    assert_eq!(store.stats().lookups, 0);
}

#[tokio::test]
async fn test_known_kind_missing_from_catalog_fails() {
    let store = store();
    let catalog = catalog();
    let context = LoadContext::new(&store, &catalog);

    let report = context
        .process_group("project", vec![document("doc-1", "project", event_records())])
        .await
        .unwrap();
    assert_eq!(report.dispatch, Dispatch::Failed);
    assert_eq!(report.count(DocumentStatus::Error), 1);
}

#[tokio::test]
async fn test_code_and_name_of_one_activity_load_together() {
    let store = store();
    let catalog = catalog();
    let context = LoadContext::new(&store, &catalog);

    let reports = context
        .run(vec![
            document("doc-1", "1", event_records()),
            document("doc-2", "event", event_records()),
        ])
        .await
        .unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].activity, "1");
    assert_eq!(reports[0].dispatch, Dispatch::Loaded);
    assert_eq!(reports[0].count(DocumentStatus::Processed), 2);
    assert_eq!(store.rows("fact_event").unwrap().len(), 1);
}
