//! Warehouse description: which batch columns feed which tables
//!
//! - [`WarehouseCatalog`]: `schema.yaml` + `mapping.yaml`, turned into
//!   dimension and fact specs per activity
//! - [`ColumnMapper`]: source header aliases onto standard columns

pub mod catalog;
pub mod mapping;

pub use catalog::{
    ActivityEntry, ActivityPlan, CatalogError, CatalogResult, ChildEntry, DimensionRef,
    MappingEntry, TableEntry, WarehouseCatalog, WarehouseSchema,
};
pub use mapping::{ColumnMapper, HeaderMatch, MappingError};
