//! Backup job lifecycle.
//!
//! A job moves through a data phase (items appended to the main catalog
//! database) and, for Full/SyntheticFull jobs with inline checkpointing on,
//! a checkpoint phase. A failed checkpoint never fails the job: it completes
//! with degraded protection and the error is kept on the job record.

use crate::archive::job_metadata_object_id;
use crate::catalog::{CatalogItem, IndexDb, JobMetadata, JOB_METADATA_VERSION};
use crate::engine::CatalogEngine;
use crate::models::catalog_db::{self, DatabaseStatus};
use crate::models::checkpoint::{self, Checkpoint};
use crate::models::entity::{BackupEntity, IndexStrategy};
use crate::models::job::{self, CheckpointState, Job, JobLevel, JobStatus};
use crate::models::{settings, to_timestamp};
use crate::utils::errors::{CatalogError, Result};
use crate::utils::retry::retry;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

/// Where a job ended up after a lifecycle call.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job: Job,
    pub checkpoints: Vec<Checkpoint>,
    /// Set when the job completed without its checkpoint
    pub degraded: Option<String>,
}

impl JobOutcome {
    fn plain(job: Job) -> Self {
        Self {
            job,
            checkpoints: Vec::new(),
            degraded: None,
        }
    }
}

fn ensure_in_data_phase(job: &Job) -> Result<()> {
    if job.status != JobStatus::Running
        || job.checkpoint_state != CheckpointState::Running
        || job.end_time.is_some()
    {
        return Err(CatalogError::InvalidState(format!(
            "job {} is not in its data phase ({} / {})",
            job.id, job.status, job.checkpoint_state
        )));
    }
    Ok(())
}

impl CatalogEngine {
    /// Open a new job for `entity_id`. An Incremental or Differential job
    /// with no completed Full before it runs as a Full.
    pub fn start_job(&self, entity_id: &str, level: JobLevel, start_time: DateTime<Utc>) -> Result<Job> {
        let entity = self.entity(entity_id)?;
        self.claim_writer(entity_id)?;
        match self.open_job(&entity, level, start_time) {
            Ok(job) => {
                info!(
                    job_id = job.id,
                    entity_id,
                    level = %job.level,
                    database_guid = %job.database_guid,
                    "Job started"
                );
                Ok(job)
            }
            Err(e) => {
                self.release_writer(entity_id);
                Err(e)
            }
        }
    }

    fn open_job(&self, entity: &BackupEntity, level: JobLevel, start_time: DateTime<Utc>) -> Result<Job> {
        let mut conn = self.conn()?;

        let level = if !level.opens_cycle() && !job::has_completed_cycle_start(&conn, &entity.id)? {
            info!(entity_id = %entity.id, requested = %level, "No completed full backup yet, running as full");
            JobLevel::Full
        } else {
            level
        };

        // Cycles are ordered by start time; a job may not start before the
        // last one ended.
        let latest = job::find_by_entity(&conn, &entity.id)?
            .iter()
            .filter(|j| j.status != JobStatus::Failed)
            .map(Job::effective_end)
            .max();
        if let Some(latest) = latest {
            if start_time < latest {
                return Err(CatalogError::InvalidInput(format!(
                    "start time {start_time} precedes the latest job of entity {} ({latest})",
                    entity.id
                )));
            }
        }

        let tx = conn.transaction()?;
        let database = match catalog_db::find_main(&tx, &entity.id)? {
            None => self.create_database(&tx, &entity.id)?,
            Some(current)
                if level.opens_cycle()
                    && entity.index_strategy == IndexStrategy::CreateNew
                    && job::count_with_data(&tx, &current.guid)? > 0 =>
            {
                let next = self.create_database(&tx, &entity.id)?;
                catalog_db::set_status(&tx, &current.guid, DatabaseStatus::Superseded)?;
                info!(
                    entity_id = %entity.id,
                    superseded = %current.guid,
                    main = %next.guid,
                    "Cycle rollover to a new catalog database"
                );
                next
            }
            Some(current) => current,
        };

        let job = job::create(&tx, &entity.id, &database.guid, level, &start_time)?;
        tx.commit()?;

        // The catalog file only learns about ids the control store issued.
        let recorded = IndexDb::open(Path::new(&database.path))
            .and_then(|db| db.record_job(job.id, level, to_timestamp(&start_time), None));
        if let Err(e) = recorded {
            warn!(job_id = job.id, entity_id = %entity.id, error = %e, "Could not register job in catalog database");
            job::update_status(&conn, job.id, JobStatus::Failed)?;
            return Err(e);
        }
        Ok(job)
    }

    /// Append item metadata captured by a running job.
    pub fn append_items(&self, job_id: i64, items: &[CatalogItem]) -> Result<usize> {
        let conn = self.conn()?;
        let job = job::get(&conn, job_id)?;
        ensure_in_data_phase(&job)?;

        let database = catalog_db::find_by_guid(&conn, &job.database_guid)?
            .ok_or_else(|| CatalogError::NotFound(format!("catalog database {}", job.database_guid)))?;
        let mut index = IndexDb::open(Path::new(&database.path))?;
        let inserted = index.append(job.id, items)?;
        debug!(job_id, received = items.len(), inserted, "Items appended");
        Ok(inserted)
    }

    /// Close the data phase: archive the job's metadata, then either queue
    /// the checkpoint phase or complete the job.
    pub fn end_data_phase(&self, job_id: i64, end_time: DateTime<Utc>) -> Result<Job> {
        let conn = self.conn()?;
        let job = job::get(&conn, job_id)?;
        ensure_in_data_phase(&job)?;
        if end_time < job.start_time {
            return Err(CatalogError::InvalidInput(format!(
                "job {job_id} cannot end before it started"
            )));
        }

        let database = catalog_db::find_by_guid(&conn, &job.database_guid)?
            .ok_or_else(|| CatalogError::NotFound(format!("catalog database {}", job.database_guid)))?;
        let index = IndexDb::open(Path::new(&database.path))?;
        let (start, end) = (to_timestamp(&job.start_time), to_timestamp(&end_time));
        index.record_job(job.id, job.level, start, Some(end))?;

        let metadata = JobMetadata {
            version: JOB_METADATA_VERSION,
            job_id: job.id,
            level: job.level,
            start_time: start,
            end_time: end,
            items: index.items_for_job(job.id)?,
        };
        let payload = serde_json::to_vec(&metadata)?;
        let object_id = job_metadata_object_id(&database.guid, job.id);
        retry("job metadata upload", self.config.checkpoint.max_attempts, |_| {
            self.archive.put(&object_id, &payload)
        })
        .map_err(|e| e.last)?;
        job::end_data_phase(&conn, job.id, &end_time, &object_id)?;

        let next = if job.level.opens_cycle() && settings::inline_checkpointing(&conn)? {
            CheckpointState::CheckpointPending
        } else {
            CheckpointState::NotApplicable
        };
        job::update_checkpoint_state(&conn, job.id, next, None)?;
        info!(job_id, items = metadata.items.len(), next = %next, "Data phase ended");

        if next == CheckpointState::NotApplicable {
            self.complete_job(&conn, &job)?;
        }
        job::get(&conn, job.id)
    }

    /// Run the checkpoint phase of a job waiting in `CheckpointPending`.
    /// Calling it on a job whose phase already ran returns the recorded
    /// outcome.
    pub fn run_checkpoint_phase(&self, job_id: i64) -> Result<JobOutcome> {
        let conn = self.conn()?;
        let job = job::get(&conn, job_id)?;
        match job.checkpoint_state {
            CheckpointState::CheckpointPending => {}
            state if state.is_terminal() => {
                return Ok(JobOutcome {
                    checkpoints: checkpoint::find_by_job(&conn, job.id)?,
                    degraded: job.checkpoint_error.clone(),
                    job,
                })
            }
            state => {
                return Err(CatalogError::InvalidState(format!(
                    "job {job_id} is {state}, not in its checkpoint phase"
                )))
            }
        }

        match self.checkpoints().checkpoint_for_job(&job) {
            Ok(checkpoints) => {
                job::update_checkpoint_state(&conn, job.id, CheckpointState::Checkpointed, None)?;
                self.complete_job(&conn, &job)?;
                Ok(JobOutcome {
                    job: job::get(&conn, job.id)?,
                    checkpoints,
                    degraded: None,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(job_id, error = %reason, "Checkpoint failed, job completes without it");
                job::set_checkpoint_error(&conn, job.id, &reason)?;
                job::update_checkpoint_state(&conn, job.id, CheckpointState::Skipped, None)?;
                self.complete_job(&conn, &job)?;
                Ok(JobOutcome {
                    job: job::get(&conn, job.id)?,
                    checkpoints: Vec::new(),
                    degraded: Some(reason),
                })
            }
        }
    }

    /// End the data phase and, when one is queued, run the checkpoint phase.
    pub fn finish_job(&self, job_id: i64, end_time: DateTime<Utc>) -> Result<JobOutcome> {
        let job = self.end_data_phase(job_id, end_time)?;
        if job.checkpoint_state == CheckpointState::CheckpointPending {
            self.run_checkpoint_phase(job_id)
        } else {
            Ok(JobOutcome::plain(job))
        }
    }

    pub fn suspend_job(&self, job_id: i64) -> Result<Job> {
        let conn = self.conn()?;
        let job = job::get(&conn, job_id)?;
        let resumable = matches!(
            job.checkpoint_state,
            CheckpointState::Running | CheckpointState::CheckpointPending
        );
        if job.status != JobStatus::Running || !resumable {
            return Err(CatalogError::InvalidState(format!(
                "job {job_id} cannot be suspended while {} / {}",
                job.status, job.checkpoint_state
            )));
        }
        job::update_checkpoint_state(&conn, job.id, CheckpointState::Suspended, Some(job.checkpoint_state))?;
        info!(job_id, phase = %job.checkpoint_state, "Job suspended");
        job::get(&conn, job.id)
    }

    /// Resume a suspended job into the phase it left; a job suspended while
    /// its checkpoint was pending runs the checkpoint phase now.
    pub fn resume_job(&self, job_id: i64) -> Result<JobOutcome> {
        let conn = self.conn()?;
        let job = job::get(&conn, job_id)?;
        if job.checkpoint_state != CheckpointState::Suspended {
            return Err(CatalogError::InvalidState(format!("job {job_id} is not suspended")));
        }
        let phase = job.resume_state.unwrap_or(CheckpointState::Running);
        job::update_checkpoint_state(&conn, job.id, phase, None)?;
        info!(job_id, phase = %phase, "Job resumed");

        if phase == CheckpointState::CheckpointPending {
            drop(conn);
            return self.run_checkpoint_phase(job_id);
        }
        Ok(JobOutcome::plain(job::get(&conn, job.id)?))
    }

    /// Abandon a running job. Its items and metadata object are dropped; it
    /// never joins a cycle.
    pub fn fail_job(&self, job_id: i64, reason: &str) -> Result<Job> {
        let conn = self.conn()?;
        let job = job::get(&conn, job_id)?;
        if job.status != JobStatus::Running {
            return Err(CatalogError::InvalidState(format!(
                "job {job_id} is {}, only running jobs can fail",
                job.status
            )));
        }
        job::update_status(&conn, job.id, JobStatus::Failed)?;
        self.release_writer(&job.entity_id);
        warn!(job_id, entity_id = %job.entity_id, reason, "Job failed");

        if let Some(database) = catalog_db::find_by_guid(&conn, &job.database_guid)? {
            match IndexDb::open(Path::new(&database.path)).and_then(|mut db| db.purge_jobs(&[job.id])) {
                Ok(removed) => debug!(job_id, removed, "Items of failed job removed"),
                Err(e) => warn!(job_id, error = %e, "Could not remove items of failed job"),
            }
        }
        if let Some(object_id) = &job.metadata_object {
            if let Err(e) = self.archive.delete(object_id) {
                warn!(job_id, object_id, error = %e, "Could not remove metadata of failed job");
            }
        }
        job::get(&conn, job.id)
    }

    fn complete_job(&self, conn: &Connection, job: &Job) -> Result<()> {
        job::update_status(conn, job.id, JobStatus::Completed)?;
        self.release_writer(&job.entity_id);
        info!(job_id = job.id, entity_id = %job.entity_id, level = %job.level, "Job completed");
        Ok(())
    }
}
