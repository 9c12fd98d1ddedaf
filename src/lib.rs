//! dwh-loader - surrogate-key resolution and fact loading for star schemas
//!
//! Provides:
//! - Schema-typed batches and declarative table specs (`models`)
//! - Batched lookup/insert key stores: memory, DuckDB, PostgreSQL (`store`)
//! - Dimension resolution, fact loading and child links (`engine`)
//! - Warehouse catalog and header mapping from YAML (`config`)
//! - Per-activity grouping and document status tracking (`pipeline`)

pub mod config;
pub mod engine;
pub mod models;
pub mod pipeline;
pub mod store;

#[cfg(feature = "cli")]
pub mod cli;

// Re-export commonly used types
pub use config::{
    ActivityPlan, CatalogError, ColumnMapper, HeaderMatch, MappingError, WarehouseCatalog,
};
pub use engine::{
    DimensionResolver, FactLoader, LoadError, LoadOutcome, LoadResult, Resolution, ResolveStats,
    load_calendar,
};
pub use models::{
    ActivityKind, BatchError, ChildSpec, ColumnDef, ColumnMapping, DataType, DimensionSpec,
    DocumentStatus, FactSpec, KeyTuple, LinkSpec, Meta, NaturalKeySpec, Row, RowSetState, Schema,
    SurrogateKey, TabularBatch, Value,
};
pub use pipeline::{Dispatch, GroupReport, LoadContext, PipelineError, SourceDocument};
#[cfg(feature = "duckdb-backend")]
pub use store::DuckDbKeyStore;
#[cfg(feature = "postgres-backend")]
pub use store::PostgresKeyStore;
pub use store::{
    KeyStore, KeyedRow, MemoryKeyStore, MemoryTable, StoreConfig, StoreError, StoreResult,
};
