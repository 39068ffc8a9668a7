//! Temp database synthesizer: rebuilds a catalog database for jobs no live
//! database or checkpoint covers, by replaying their archived job metadata.

use crate::archive::job_metadata_object_id;
use crate::catalog::{IndexDb, JobMetadata};
use crate::engine::CatalogEngine;
use crate::models::job::Job;
use crate::utils::errors::{CatalogError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct TempDatabase {
    pub name: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub job_ids: Vec<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// `temp_<entity>_<start>_<end>`, timestamps as `%Y%m%d%H%M%S` UTC.
pub fn temp_database_name(entity_id: &str, start: &DateTime<Utc>, end: &DateTime<Utc>) -> String {
    format!(
        "temp_{entity_id}_{}_{}",
        start.format("%Y%m%d%H%M%S"),
        end.format("%Y%m%d%H%M%S")
    )
}

pub struct Synthesizer<'a> {
    engine: &'a CatalogEngine,
}

impl<'a> Synthesizer<'a> {
    pub(crate) fn new(engine: &'a CatalogEngine) -> Self {
        Self { engine }
    }

    /// Build a temp database holding exactly `jobs` under `dir`. The result
    /// is checked against the request: a database that answers for any other
    /// job set is rejected with `SynthesisMismatch`.
    pub fn synthesize(&self, entity_id: &str, jobs: &[Job], dir: &Path) -> Result<TempDatabase> {
        let (Some(start_time), Some(end_time)) = (
            jobs.iter().map(|j| j.start_time).min(),
            jobs.iter().map(Job::effective_end).max(),
        ) else {
            return Err(CatalogError::InvalidInput("no jobs to synthesize".into()));
        };

        let name = temp_database_name(entity_id, &start_time, &end_time);
        let path = dir.join(format!("{name}.db"));
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let mut expected: Vec<i64> = jobs.iter().map(|j| j.id).collect();
        expected.sort_unstable();
        expected.dedup();

        let mut index = IndexDb::create(&path)?;
        for job in jobs {
            let object_id = job
                .metadata_object
                .clone()
                .unwrap_or_else(|| job_metadata_object_id(&job.database_guid, job.id));
            let bytes = self.engine.archive.get(&object_id)?;
            let metadata: JobMetadata = serde_json::from_slice(&bytes)?;
            index.record_job(
                metadata.job_id,
                metadata.level,
                metadata.start_time,
                Some(metadata.end_time),
            )?;
            let inserted = index.append(metadata.job_id, &metadata.items)?;
            debug!(job_id = job.id, object_id, inserted, "Job metadata replayed");
        }

        let mut actual = index.job_ids()?;
        actual.extend(index.item_job_ids()?);
        actual.sort_unstable();
        actual.dedup();
        if actual != expected {
            return Err(CatalogError::SynthesisMismatch {
                name,
                expected,
                actual,
            });
        }

        info!(entity_id, name = %name, jobs = expected.len(), "Temp database synthesized");
        Ok(TempDatabase {
            name,
            path,
            job_ids: expected,
            start_time,
            end_time,
        })
    }
}
