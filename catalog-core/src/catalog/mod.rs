//! Catalog store: per-entity index databases holding item metadata keyed by
//! job, plus the per-job metadata records the temp database synthesizer
//! replays.

pub mod compact;
pub mod index;

use crate::models::job::JobLevel;
use serde::{Deserialize, Serialize};

pub use compact::{compact, CompactionReport};
pub use index::IndexDb;

/// Metadata of one backed-up item as produced by the scan pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub path: String,
    pub size: u64,
    /// Last modified time (seconds since Unix epoch)
    pub mtime: i64,
    /// Tombstone: the path was deleted as of this job
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// An item tagged with the job that recorded it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub job_id: i64,
    #[serde(flatten)]
    pub item: CatalogItem,
}

/// Everything a job contributed to the catalog, archived when its data phase
/// ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub version: u32,
    pub job_id: i64,
    pub level: JobLevel,
    pub start_time: i64,
    pub end_time: i64,
    pub items: Vec<CatalogItem>,
}

pub const JOB_METADATA_VERSION: u32 = 1;
