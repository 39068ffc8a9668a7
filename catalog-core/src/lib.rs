//! Backup catalog index engine.
//!
//! Keeps one versioned index database per backup entity, snapshots it into
//! checkpoints when Full/SyntheticFull jobs complete, prunes catalog data by
//! cycle-based retention and answers browse requests that span cycles.

pub mod archive;
pub mod browse;
pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod cycle;
pub mod db;
pub mod engine;
pub mod lifecycle;
pub mod models;
pub mod prune;
pub mod utils;

// Re-export commonly used types
pub use browse::{BrowseRequest, BrowseResult, BrowseSession, ResolvedSource, RestoreReport};
pub use catalog::{CatalogItem, CompactionReport, ItemRecord};
pub use config::EngineConfig;
pub use cycle::Cycle;
pub use engine::CatalogEngine;
pub use lifecycle::JobOutcome;
pub use models::catalog_db::{CatalogDatabaseRecord, DatabaseStatus};
pub use models::checkpoint::Checkpoint;
pub use models::entity::{BackupEntity, IndexStrategy};
pub use models::job::{CheckpointState, Job, JobLevel, JobStatus};
pub use prune::{AgingReport, PruneReport};
pub use utils::errors::CatalogError;
pub type Result<T> = std::result::Result<T, CatalogError>;
