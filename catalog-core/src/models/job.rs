use crate::models::{from_timestamp, to_timestamp};
use crate::utils::errors::{CatalogError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobLevel {
    Full,
    Incremental,
    Differential,
    SyntheticFull,
}

text_enum!(JobLevel {
    Full => "full",
    Incremental => "incremental",
    Differential => "differential",
    SyntheticFull => "synthetic_full",
});

impl JobLevel {
    /// Full and SyntheticFull jobs open a cycle and are the only levels that
    /// ever get a checkpoint.
    pub fn opens_cycle(&self) -> bool {
        matches!(self, JobLevel::Full | JobLevel::SyntheticFull)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Aged,
}

text_enum!(JobStatus {
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    Aged => "aged",
});

/// Checkpoint dimension of the job state machine:
/// `Running → Suspended ⇄ Running → CheckpointPending → Checkpointed | NotApplicable`.
/// `Skipped` marks a checkpoint that failed after its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointState {
    Running,
    Suspended,
    CheckpointPending,
    Checkpointed,
    NotApplicable,
    Skipped,
}

text_enum!(CheckpointState {
    Running => "running",
    Suspended => "suspended",
    CheckpointPending => "checkpoint_pending",
    Checkpointed => "checkpointed",
    NotApplicable => "not_applicable",
    Skipped => "skipped",
});

impl CheckpointState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckpointState::Checkpointed | CheckpointState::NotApplicable | CheckpointState::Skipped
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub entity_id: String,
    pub database_guid: String,
    pub level: JobLevel,
    pub status: JobStatus,
    pub checkpoint_state: CheckpointState,
    /// Phase a suspended job re-enters on resume
    pub resume_state: Option<CheckpointState>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub metadata_object: Option<String>,
    pub checkpoint_error: Option<String>,
}

impl Job {
    /// Data phase finished and the job was neither failed nor aged out.
    pub fn has_catalog_data(&self) -> bool {
        self.end_time.is_some() && matches!(self.status, JobStatus::Running | JobStatus::Completed)
    }

    /// Start time doubles as the end for jobs still in their data phase.
    pub fn effective_end(&self) -> DateTime<Utc> {
        self.end_time.unwrap_or(self.start_time)
    }
}

fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get("id")?,
        entity_id: row.get("entity_id")?,
        database_guid: row.get("database_guid")?,
        level: row.get("level")?,
        status: row.get("status")?,
        checkpoint_state: row.get("checkpoint_state")?,
        resume_state: row.get("resume_state")?,
        start_time: from_timestamp(row.get("start_time")?),
        end_time: row.get::<_, Option<i64>>("end_time")?.map(from_timestamp),
        metadata_object: row.get("metadata_object")?,
        checkpoint_error: row.get("checkpoint_error")?,
    })
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Job>> {
    let job = conn
        .query_row("SELECT * FROM jobs WHERE id = ?", params![id], row_to_job)
        .optional()?;
    Ok(job)
}

pub fn get(conn: &Connection, id: i64) -> Result<Job> {
    find_by_id(conn, id)?.ok_or_else(|| CatalogError::NotFound(format!("job {id}")))
}

/// All jobs of an entity in cycle order.
pub fn find_by_entity(conn: &Connection, entity_id: &str) -> Result<Vec<Job>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM jobs WHERE entity_id = ? ORDER BY start_time, id",
    )?;
    let rows = stmt.query_map(params![entity_id], row_to_job)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn find_by_database(conn: &Connection, database_guid: &str) -> Result<Vec<Job>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM jobs WHERE database_guid = ? ORDER BY start_time, id",
    )?;
    let rows = stmt.query_map(params![database_guid], row_to_job)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn find_running(conn: &Connection) -> Result<Vec<Job>> {
    let mut stmt = conn.prepare("SELECT * FROM jobs WHERE status = 'running' ORDER BY id")?;
    let rows = stmt.query_map([], row_to_job)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Whether the entity has a completed job able to anchor a cycle.
pub fn has_completed_cycle_start(conn: &Connection, entity_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE entity_id = ? AND status = 'completed'
         AND level IN ('full','synthetic_full')",
        params![entity_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn count_with_data(conn: &Connection, database_guid: &str) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE database_guid = ? AND status IN ('running','completed')
         AND end_time IS NOT NULL",
        params![database_guid],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn create(
    conn: &Connection,
    entity_id: &str,
    database_guid: &str,
    level: JobLevel,
    start_time: &DateTime<Utc>,
) -> Result<Job> {
    conn.execute(
        "INSERT INTO jobs (entity_id, database_guid, level, status, checkpoint_state, start_time)
         VALUES (?1, ?2, ?3, 'running', 'running', ?4)",
        params![entity_id, database_guid, level, to_timestamp(start_time)],
    )?;
    get(conn, conn.last_insert_rowid())
}

pub fn update_checkpoint_state(
    conn: &Connection,
    id: i64,
    state: CheckpointState,
    resume_state: Option<CheckpointState>,
) -> Result<()> {
    conn.execute(
        "UPDATE jobs SET checkpoint_state = ?, resume_state = ? WHERE id = ?",
        params![state, resume_state, id],
    )?;
    Ok(())
}

pub fn end_data_phase(
    conn: &Connection,
    id: i64,
    end_time: &DateTime<Utc>,
    metadata_object: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE jobs SET end_time = ?, metadata_object = ? WHERE id = ?",
        params![to_timestamp(end_time), metadata_object, id],
    )?;
    Ok(())
}

pub fn update_status(conn: &Connection, id: i64, status: JobStatus) -> Result<()> {
    conn.execute("UPDATE jobs SET status = ? WHERE id = ?", params![status, id])?;
    Ok(())
}

pub fn set_checkpoint_error(conn: &Connection, id: i64, error: &str) -> Result<()> {
    conn.execute(
        "UPDATE jobs SET checkpoint_error = ? WHERE id = ?",
        params![error, id],
    )?;
    Ok(())
}

pub fn mark_aged(conn: &Connection, ids: &[i64]) -> Result<usize> {
    let mut stmt = conn.prepare("UPDATE jobs SET status = 'aged' WHERE id = ?")?;
    let mut changed = 0;
    for id in ids {
        changed += stmt.execute(params![id])?;
    }
    Ok(changed)
}
