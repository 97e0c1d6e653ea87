//! Storage layer for Harvestr - incremental record upserts over a JSONL log
//! with an SQLite index.
//!
//! - `traits`: filter language, projections and the `RecordBackend` seam
//! - `indexed`: the persistent backend
//! - `records`: `RecordStore`, the upsert logic on top of any backend

mod indexed;
mod records;
mod traits;

use std::path::Path;

pub use indexed::IndexedStore;
pub use records::{DynRecordStore, RecordStore, UpsertSummary};
pub use traits::{Filter, FilterOp, Projection, RecordBackend};

use crate::error::Result;

/// Open the persistent record store rooted at `data_dir`.
pub fn open(data_dir: &Path) -> Result<DynRecordStore> {
    Ok(DynRecordStore::boxed(IndexedStore::open_at(data_dir)?))
}
