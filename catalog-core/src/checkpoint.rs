//! Checkpoint manager.
//!
//! A checkpoint is a compressed snapshot of a catalog database taken at the
//! end of a Full/SyntheticFull job, or on explicit request. Its interval runs
//! from the start of the database's latest cycle to the end of the latest
//! captured job, so any job inside the interval can be browsed from the
//! snapshot alone.

use crate::archive::{checkpoint_object_id, explicit_checkpoint_object_id};
use crate::catalog::IndexDb;
use crate::engine::{poisoned, CatalogEngine};
use crate::models::catalog_db::{self, CatalogDatabaseRecord, DatabaseStatus};
use crate::models::checkpoint::{self, Checkpoint, NewCheckpoint};
use crate::models::entity;
use crate::models::job::{self, Job, JobStatus};
use crate::models::to_timestamp;
use crate::utils::errors::{CatalogError, Result};
use crate::utils::retry::retry;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct CheckpointManager<'a> {
    engine: &'a CatalogEngine,
}

impl<'a> CheckpointManager<'a> {
    pub(crate) fn new(engine: &'a CatalogEngine) -> Self {
        Self { engine }
    }

    /// Checkpoint phase of a Full/SyntheticFull job: seal the database it
    /// superseded (if any), then snapshot its own database.
    pub(crate) fn checkpoint_for_job(&self, job: &Job) -> Result<Vec<Checkpoint>> {
        if !job.level.opens_cycle() {
            return Err(CatalogError::InvalidState(format!(
                "job {} is {}, only full backups are checkpointed",
                job.id, job.level
            )));
        }

        let conn = self.engine.conn()?;
        let current = catalog_db::find_by_guid(&conn, &job.database_guid)?
            .ok_or_else(|| CatalogError::NotFound(format!("catalog database {}", job.database_guid)))?;

        let mut targets = Vec::new();
        if let Some(previous) = previous_database(&conn, job)? {
            if previous.status == DatabaseStatus::Superseded {
                targets.push(previous);
            }
        }
        targets.push(current);
        drop(conn);

        let mut created = Vec::new();
        for database in &targets {
            let object_id = checkpoint_object_id(&database.guid, job.id);
            if let Some(cp) = self.checkpoint_database(database, job, &object_id)? {
                created.push(cp);
            }
        }
        Ok(created)
    }

    /// Explicit checkpoint of the entity's main database, followed by a
    /// prune. With `by_all_clients` every entity of the same backupset is
    /// checkpointed as well. Returns the requested entity's checkpoint, or
    /// `None` when nothing new was captured since its last one.
    pub fn checkpoint(&self, entity_id: &str, by_all_clients: bool) -> Result<Option<Checkpoint>> {
        let requested = self.engine.entity(entity_id)?;
        let targets = if by_all_clients {
            let conn = self.engine.conn()?;
            entity::find_by_backupset(&conn, &requested.backupset_id)?
        } else {
            vec![requested.clone()]
        };

        let mut result = None;
        for target in &targets {
            match self.checkpoint_main(&target.id) {
                Ok(cp) if target.id == requested.id => result = cp,
                Ok(_) => {}
                Err(e) if target.id == requested.id => return Err(e),
                Err(e) => warn!(entity_id = %target.id, error = %e, "Checkpoint of sibling entity failed"),
            }
            self.engine.pruner().prune(&target.id)?;
        }
        Ok(result)
    }

    fn checkpoint_main(&self, entity_id: &str) -> Result<Option<Checkpoint>> {
        let conn = self.engine.conn()?;
        let Some(main) = catalog_db::find_main(&conn, entity_id)? else {
            debug!(entity_id, "No catalog database yet");
            return Ok(None);
        };

        let captured: Vec<Job> = job::find_by_database(&conn, &main.guid)?
            .into_iter()
            .filter(Job::has_catalog_data)
            .collect();
        let Some(anchor) = captured.iter().rev().find(|j| j.level.opens_cycle()) else {
            info!(entity_id, "No full backup in the main database, nothing to checkpoint");
            return Ok(None);
        };
        let captured_end = captured
            .iter()
            .map(Job::effective_end)
            .max()
            .unwrap_or(anchor.start_time);
        drop(conn);

        let object_id = explicit_checkpoint_object_id(&main.guid, anchor.id, to_timestamp(&captured_end));
        self.checkpoint_database(&main, anchor, &object_id)
    }

    /// Snapshot `database` into `object_id`. Recording the same object twice
    /// returns the existing checkpoint. Nothing is written when no job has
    /// been captured since the database's latest checkpoint.
    fn checkpoint_database(
        &self,
        database: &CatalogDatabaseRecord,
        trigger: &Job,
        object_id: &str,
    ) -> Result<Option<Checkpoint>> {
        let lock = self.engine.entity_lock(&database.entity_id);
        let _shared = lock.read().map_err(|_| poisoned(&database.entity_id))?;
        let conn = self.engine.conn()?;

        if let Some(existing) = checkpoint::find_by_object_id(&conn, object_id)? {
            debug!(object_id, "Checkpoint already recorded");
            return Ok(Some(existing));
        }

        // The interval opens at the database's latest cycle start; older
        // cycles a reused database still holds age out on their own.
        let mut captured: Vec<Job> = job::find_by_database(&conn, &database.guid)?
            .into_iter()
            .filter(Job::has_catalog_data)
            .collect();
        let Some(start_time) = captured
            .iter()
            .filter(|j| j.level.opens_cycle())
            .map(|j| j.start_time)
            .max()
        else {
            debug!(database_guid = %database.guid, "Database holds no captured full backup");
            return Ok(None);
        };
        captured.retain(|j| j.start_time >= start_time);
        let end_time = captured
            .iter()
            .map(Job::effective_end)
            .max()
            .unwrap_or(start_time);

        let covered_until = checkpoint::find_by_database(&conn, &database.guid)?
            .iter()
            .map(|cp| cp.end_time)
            .max();
        if let Some(covered_until) = covered_until {
            if !captured.iter().any(|j| j.effective_end() > covered_until) {
                info!(database_guid = %database.guid, "No job captured since the last checkpoint");
                return Ok(None);
            }
        }

        let failure = |reason: String| CatalogError::CheckpointFailure {
            job_id: trigger.id,
            database_guid: database.guid.clone(),
            reason,
        };
        let attempts = self.engine.config.checkpoint.max_attempts;

        let scratch = self
            .engine
            .config
            .sessions_root()
            .join(format!("snapshot-{}", Uuid::new_v4()));
        let snapshot = scratch.join(format!("{}.db", database.guid));
        let uploaded = retry("checkpoint snapshot", attempts, |_| {
            IndexDb::open_read_only(Path::new(&database.path))?.snapshot_to(&snapshot)?;
            self.engine.archive.put_file(object_id, &snapshot)
        });
        if let Err(e) = std::fs::remove_dir_all(&scratch) {
            debug!(path = %scratch.display(), error = %e, "Snapshot scratch not removed");
        }
        let size = uploaded.map_err(|e| failure(e.last.to_string()))?;

        let record = NewCheckpoint {
            entity_id: &database.entity_id,
            database_guid: &database.guid,
            job_id: trigger.id,
            start_time,
            end_time,
            backing_object_id: object_id,
        };
        let created = retry("checkpoint record", attempts, |_| checkpoint::insert(&conn, &record))
            .map_err(|e| failure(e.last.to_string()))?;

        info!(
            checkpoint_id = created.id,
            job_id = trigger.id,
            database_guid = %database.guid,
            object_id,
            size,
            "Checkpoint created"
        );
        Ok(Some(created))
    }

    /// Mark a checkpoint unusable for resolution. Its object stays until the
    /// next prune reaches it.
    pub fn invalidate(&self, checkpoint_id: i64) -> Result<Checkpoint> {
        let conn = self.engine.conn()?;
        let cp = checkpoint::find_by_id(&conn, checkpoint_id)?
            .ok_or_else(|| CatalogError::NotFound(format!("checkpoint {checkpoint_id}")))?;

        let lock = self.engine.entity_lock(&cp.entity_id);
        let _exclusive = lock.write().map_err(|_| poisoned(&cp.entity_id))?;
        if checkpoint::invalidate(&conn, cp.id)? {
            info!(checkpoint_id, entity_id = %cp.entity_id, "Checkpoint invalidated");
        }
        checkpoint::find_by_id(&conn, cp.id)?
            .ok_or_else(|| CatalogError::NotFound(format!("checkpoint {checkpoint_id}")))
    }

    pub fn get(&self, checkpoint_id: i64) -> Result<Checkpoint> {
        let conn = self.engine.conn()?;
        checkpoint::find_by_id(&conn, checkpoint_id)?
            .ok_or_else(|| CatalogError::NotFound(format!("checkpoint {checkpoint_id}")))
    }

    pub fn list(&self, entity_id: &str) -> Result<Vec<Checkpoint>> {
        let conn = self.engine.conn()?;
        checkpoint::find_by_entity(&conn, entity_id)
    }

    pub fn list_for_database(&self, database_guid: &str) -> Result<Vec<Checkpoint>> {
        let conn = self.engine.conn()?;
        checkpoint::find_by_database(&conn, database_guid)
    }
}

/// Database of the latest completed job before `job` that lives elsewhere.
fn previous_database(conn: &rusqlite::Connection, job: &Job) -> Result<Option<CatalogDatabaseRecord>> {
    let previous = job::find_by_entity(conn, &job.entity_id)?
        .into_iter()
        .filter(|j| j.id < job.id && j.status == JobStatus::Completed && j.database_guid != job.database_guid)
        .max_by_key(|j| j.id);
    match previous {
        Some(p) => catalog_db::find_by_guid(conn, &p.database_guid),
        None => Ok(None),
    }
}
