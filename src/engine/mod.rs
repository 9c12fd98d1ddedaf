//! Surrogate-key resolution and fact loading
//!
//! Components, leaves first:
//! - [`BatchDeduplicator`]: distinct natural-key projection of a batch
//! - [`KeyLookupService`]: one batched lookup per call
//! - [`InsertService`]: one batched insert of the missing tuples
//! - [`RowKeyMerger`]: resolved keys back onto every original row
//! - [`DimensionResolver`]: the four steps above for one dimension
//! - [`FactLoader`]: dimensions, then the fact table, then child links
//!
//! All store calls are awaited one at a time. The engine assumes a single
//! writer per table; callers running loads concurrently must serialize
//! writes to the same table.

pub mod calendar;
pub mod child;
pub mod dedup;
pub mod error;
pub mod fact;
pub mod insert;
pub mod lookup;
pub mod merge;
pub mod resolver;

pub use calendar::{CALENDAR_COLUMNS, DATE_KEY_COLUMN, calendar_rows, load_calendar};
pub use child::{ChildLoad, expand_children, load_children, split_tokens};
pub use dedup::{BatchDeduplicator, KeyProjection};
pub use error::{LoadError, LoadResult};
pub use fact::{FactLoader, LoadOutcome};
pub use insert::InsertService;
pub use lookup::{KeyLookupService, ResolvedKeyTable};
pub use merge::RowKeyMerger;
pub use resolver::{DimensionResolver, Resolution, ResolveStats};
