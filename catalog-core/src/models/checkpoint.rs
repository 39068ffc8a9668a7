use crate::models::job::Job;
use crate::models::{from_timestamp, to_timestamp};
use crate::utils::errors::{CatalogError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// Checkpoint record as kept in the control store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: i64,
    pub entity_id: String,
    pub database_guid: String,
    /// Full/SyntheticFull job that triggered the snapshot
    pub job_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub valid_flag: i64,
    pub backing_object_id: String,
    pub created_at: String,
}

impl Checkpoint {
    pub fn is_valid(&self) -> bool {
        self.valid_flag != 0
    }

    /// The job lives in this checkpoint's database and its span lies inside
    /// the checkpoint interval.
    pub fn covers(&self, job: &Job) -> bool {
        job.database_guid == self.database_guid
            && job.start_time >= self.start_time
            && job.effective_end() <= self.end_time
    }
}

pub struct NewCheckpoint<'a> {
    pub entity_id: &'a str,
    pub database_guid: &'a str,
    pub job_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub backing_object_id: &'a str,
}

fn row_to_checkpoint(row: &Row) -> rusqlite::Result<Checkpoint> {
    Ok(Checkpoint {
        id: row.get("id")?,
        entity_id: row.get("entity_id")?,
        database_guid: row.get("database_guid")?,
        job_id: row.get("job_id")?,
        start_time: from_timestamp(row.get("start_time")?),
        end_time: from_timestamp(row.get("end_time")?),
        valid_flag: row.get("valid_flag")?,
        backing_object_id: row.get("backing_object_id")?,
        created_at: row.get("created_at")?,
    })
}

pub fn insert(conn: &Connection, data: &NewCheckpoint) -> Result<Checkpoint> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO checkpoints (entity_id, database_guid, job_id, start_time, end_time, valid_flag, backing_object_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7)",
        params![
            data.entity_id,
            data.database_guid,
            data.job_id,
            to_timestamp(&data.start_time),
            to_timestamp(&data.end_time),
            data.backing_object_id,
            now,
        ],
    )?;
    find_by_id(conn, conn.last_insert_rowid())?
        .ok_or_else(|| CatalogError::NotFound("checkpoint after insert".into()))
}

pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Checkpoint>> {
    let cp = conn
        .query_row("SELECT * FROM checkpoints WHERE id = ?", params![id], row_to_checkpoint)
        .optional()?;
    Ok(cp)
}

pub fn find_by_object_id(conn: &Connection, backing_object_id: &str) -> Result<Option<Checkpoint>> {
    let cp = conn
        .query_row(
            "SELECT * FROM checkpoints WHERE backing_object_id = ?",
            params![backing_object_id],
            row_to_checkpoint,
        )
        .optional()?;
    Ok(cp)
}

/// Checkpoints of one database in creation order.
pub fn find_by_database(conn: &Connection, database_guid: &str) -> Result<Vec<Checkpoint>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM checkpoints WHERE database_guid = ? ORDER BY backing_object_id ASC",
    )?;
    let rows = stmt.query_map(params![database_guid], row_to_checkpoint)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn find_by_entity(conn: &Connection, entity_id: &str) -> Result<Vec<Checkpoint>> {
    let mut stmt = conn.prepare("SELECT * FROM checkpoints WHERE entity_id = ? ORDER BY id ASC")?;
    let rows = stmt.query_map(params![entity_id], row_to_checkpoint)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn find_by_job(conn: &Connection, job_id: i64) -> Result<Vec<Checkpoint>> {
    let mut stmt = conn.prepare("SELECT * FROM checkpoints WHERE job_id = ? ORDER BY id ASC")?;
    let rows = stmt.query_map(params![job_id], row_to_checkpoint)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn find_valid_by_entity(conn: &Connection, entity_id: &str) -> Result<Vec<Checkpoint>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM checkpoints WHERE entity_id = ? AND valid_flag = 1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![entity_id], row_to_checkpoint)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn invalidate(conn: &Connection, id: i64) -> Result<bool> {
    let changes = conn.execute(
        "UPDATE checkpoints SET valid_flag = 0 WHERE id = ? AND valid_flag = 1",
        params![id],
    )?;
    Ok(changes > 0)
}

pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
    let changes = conn.execute("DELETE FROM checkpoints WHERE id = ?", params![id])?;
    Ok(changes > 0)
}
