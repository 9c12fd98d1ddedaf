//! Models module
//!
//! Data carriers consumed by the loading engine: typed scalar values,
//! schema-validated batches, declarative table descriptions and the
//! status records exchanged with the file-tracking store.

pub mod activity;
pub mod batch;
pub mod meta;
pub mod table_spec;
pub mod value;

pub use activity::ActivityKind;
pub use batch::{BatchError, ColumnDef, DataType, Row, Schema, TabularBatch};
pub use meta::{DocumentStatus, Meta, RowSetState, TransitionError};
pub use table_spec::{
    ChildSpec, ColumnMapping, DEFAULT_CHILD_DELIMITERS, DimensionSpec, FactSpec, LinkSpec,
    NaturalKeySpec,
};
pub use value::{KeyTuple, SurrogateKey, Value, date_key};
