//! Error types for the catalog engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    /// A Full/SyntheticFull job could not durably record its checkpoint.
    #[error("Checkpoint failed for job {job_id} on database {database_guid}: {reason}")]
    CheckpointFailure {
        job_id: i64,
        database_guid: String,
        reason: String,
    },

    #[error("Prune failed for entity {entity_id}: {reason}")]
    PruneFailure { entity_id: String, reason: String },

    #[error("No cycle of entity {entity_id} matches {range}")]
    ResolutionNotFound { entity_id: String, range: String },

    /// A browse sub-step failed after its retries.
    #[error(
        "Resolution failed for entity {entity_id} in {range} (last resolved: {}): {source}",
        .last_resolved.as_deref().unwrap_or("none")
    )]
    Resolution {
        entity_id: String,
        range: String,
        last_resolved: Option<String>,
        #[source]
        source: Box<CatalogError>,
    },

    #[error("Temp database {name} holds jobs {actual:?}, expected {expected:?}")]
    SynthesisMismatch {
        name: String,
        expected: Vec<i64>,
        actual: Vec<i64>,
    },

    #[error("Compaction of database {database_guid} failed after {attempts} attempts: {reason}")]
    CompactionFailure {
        database_guid: String,
        attempts: u32,
        reason: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Entity {0} already has an active writer")]
    WriterBusy(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Browse request cancelled")]
    Cancelled,

    #[error("Archive object not found: {0}")]
    ObjectNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl CatalogError {
    /// Transient storage errors are worth another attempt; everything else
    /// (bad input, corrupted metadata, state conflicts) is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CatalogError::Io(_) | CatalogError::Database(_) | CatalogError::Pool(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
