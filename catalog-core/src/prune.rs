//! Retention and pruning.
//!
//! Retention keeps the N most recent cycles of an entity. Everything older
//! goes, in a fixed order: checkpoints are invalidated first (one
//! transaction), then their objects are deleted, then catalog rows and
//! superseded database files. A browse started after the invalidation can
//! never pick a checkpoint that is about to disappear.

use crate::catalog::IndexDb;
use crate::cycle::build_cycles;
use crate::engine::{poisoned, CatalogEngine};
use crate::models::catalog_db::{self, DatabaseStatus};
use crate::models::checkpoint::{self, Checkpoint};
use crate::models::job::{self, Job, JobStatus};
use crate::utils::errors::{CatalogError, Result};
use crate::utils::retry::retry;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub entity_id: String,
    pub retention_cycles: u32,
    pub cycles_pruned: usize,
    pub jobs_aged: Vec<i64>,
    pub checkpoints_removed: Vec<i64>,
    pub objects_deleted: usize,
    pub databases_removed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PruneFailureEntry {
    pub entity_id: String,
    pub error: String,
}

/// Result of a data aging pass over every entity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgingReport {
    pub reports: Vec<PruneReport>,
    pub failures: Vec<PruneFailureEntry>,
}

pub struct PruneManager<'a> {
    engine: &'a CatalogEngine,
}

impl<'a> PruneManager<'a> {
    pub(crate) fn new(engine: &'a CatalogEngine) -> Self {
        Self { engine }
    }

    /// Apply the entity's retention. Holds the entity's exclusive lock, so
    /// no browse can select a checkpoint while it runs.
    pub fn prune(&self, entity_id: &str) -> Result<PruneReport> {
        let entity = self.engine.entity(entity_id)?;
        let lock = self.engine.entity_lock(entity_id);
        let _exclusive = lock.write().map_err(|_| poisoned(entity_id))?;
        let mut conn = self.engine.conn()?;

        let mut report = PruneReport {
            entity_id: entity_id.to_string(),
            retention_cycles: entity.retention_cycles,
            ..Default::default()
        };

        let jobs = job::find_by_entity(&conn, entity_id)?;
        let cycles = build_cycles(&jobs);
        let keep = entity.retention_cycles as usize;
        if cycles.len() <= keep {
            debug!(entity_id, cycles = cycles.len(), keep, "Nothing to prune");
            return Ok(report);
        }

        let first_kept = cycles.len() - keep;
        let boundary = cycles[first_kept].start_time();
        let mut aged: Vec<&Job> = cycles[..first_kept].iter().flat_map(|c| c.jobs.iter()).collect();
        aged.extend(
            jobs.iter()
                .filter(|j| j.status == JobStatus::Failed && j.start_time < boundary),
        );
        report.cycles_pruned = first_kept;

        let doomed: Vec<Checkpoint> = checkpoint::find_by_entity(&conn, entity_id)?
            .into_iter()
            .filter(|cp| cp.start_time < boundary)
            .collect();

        {
            let tx = conn.transaction()?;
            for cp in &doomed {
                checkpoint::invalidate(&tx, cp.id)?;
            }
            tx.commit()?;
        }

        for cp in &doomed {
            if self.delete_object(entity_id, &cp.backing_object_id)? {
                report.objects_deleted += 1;
            }
            checkpoint::delete(&conn, cp.id)?;
            report.checkpoints_removed.push(cp.id);
        }
        for job in &aged {
            if let Some(object_id) = &job.metadata_object {
                if self.delete_object(entity_id, object_id)? {
                    report.objects_deleted += 1;
                }
            }
        }

        let main = catalog_db::find_main(&conn, entity_id)?;
        if let Some(main) = &main {
            let in_main: Vec<i64> = aged
                .iter()
                .filter(|j| j.database_guid == main.guid)
                .map(|j| j.id)
                .collect();
            if !in_main.is_empty() {
                let max_attempts = self.engine.config.retention.max_attempts;
                retry("purge aged jobs", max_attempts, |_| {
                    IndexDb::open(Path::new(&main.path))?.purge_jobs(&in_main)
                })
                .map_err(|e| CatalogError::PruneFailure {
                    entity_id: entity_id.to_string(),
                    reason: format!("purging jobs from {}: {}", main.guid, e.last),
                })?;
            }
        }

        let aged_ids: Vec<i64> = aged.iter().map(|j| j.id).collect();
        job::mark_aged(&conn, &aged_ids)?;
        report.jobs_aged = aged_ids;

        for database in catalog_db::find_by_entity(&conn, entity_id)? {
            let is_main = main.as_ref().is_some_and(|m| m.guid == database.guid);
            if database.status != DatabaseStatus::Superseded || is_main {
                continue;
            }
            let live = job::find_by_database(&conn, &database.guid)?
                .iter()
                .any(|j| matches!(j.status, JobStatus::Running | JobStatus::Completed));
            if live {
                continue;
            }

            for object_id in self.engine.archive.list_for_database(&database.guid)? {
                if self.delete_object(entity_id, &object_id)? {
                    report.objects_deleted += 1;
                }
            }
            self.remove_database_file(entity_id, Path::new(&database.path))?;
            catalog_db::set_status(&conn, &database.guid, DatabaseStatus::Pruned)?;
            report.databases_removed.push(database.guid);
        }

        info!(
            entity_id,
            cycles_pruned = report.cycles_pruned,
            jobs_aged = report.jobs_aged.len(),
            checkpoints_removed = report.checkpoints_removed.len(),
            objects_deleted = report.objects_deleted,
            databases_removed = report.databases_removed.len(),
            "Prune complete"
        );
        Ok(report)
    }

    /// Prune every entity. One entity failing does not stop the others.
    pub fn prune_all(&self) -> Result<AgingReport> {
        let mut aging = AgingReport::default();
        for entity in self.engine.entities()? {
            match self.prune(&entity.id) {
                Ok(report) => aging.reports.push(report),
                Err(e) => {
                    error!(entity_id = %entity.id, error = %e, "Prune failed");
                    aging.failures.push(PruneFailureEntry {
                        entity_id: entity.id,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(aging)
    }

    fn delete_object(&self, entity_id: &str, object_id: &str) -> Result<bool> {
        retry("object delete", self.engine.config.retention.max_attempts, |_| {
            self.engine.archive.delete(object_id)
        })
        .map_err(|e| CatalogError::PruneFailure {
            entity_id: entity_id.to_string(),
            reason: format!("deleting object {object_id}: {}", e.last),
        })
    }

    fn remove_database_file(&self, entity_id: &str, path: &Path) -> Result<()> {
        retry("database file removal", self.engine.config.retention.max_attempts, |_| {
            match std::fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
        .map_err(|e| CatalogError::PruneFailure {
            entity_id: entity_id.to_string(),
            reason: format!("removing {}: {}", path.display(), e.last),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogItem;
    use crate::config::EngineConfig;
    use crate::models::entity::{CreateEntityRequest, IndexStrategy, UpdateEntityRequest};
    use crate::models::from_timestamp;
    use crate::models::job::JobLevel;

    fn setup(strategy: IndexStrategy, keep: u32) -> (tempfile::TempDir, CatalogEngine) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::with_data_dir(dir.path());
        config.checkpoint.inline = true;
        let engine = CatalogEngine::open(config).unwrap();
        engine
            .create_entity(&CreateEntityRequest {
                id: "sc".into(),
                backupset_id: "bs".into(),
                retention_cycles: Some(keep),
                index_strategy: strategy,
            })
            .unwrap();
        (dir, engine)
    }

    fn run(engine: &CatalogEngine, level: JobLevel, start: i64) -> Job {
        let job = engine.start_job("sc", level, from_timestamp(start)).unwrap();
        engine
            .append_items(
                job.id,
                &[CatalogItem {
                    path: format!("/f{start}"),
                    size: 1,
                    mtime: start,
                    deleted: false,
                    checksum: None,
                }],
            )
            .unwrap();
        engine.finish_job(job.id, from_timestamp(start + 10)).unwrap().job
    }

    #[test]
    fn test_keeps_most_recent_cycles() {
        let (_dir, engine) = setup(IndexStrategy::Reuse, 1);
        let f1 = run(&engine, JobLevel::Full, 100);
        let i1 = run(&engine, JobLevel::Incremental, 200);
        let f2 = run(&engine, JobLevel::Full, 300);

        let report = engine.pruner().prune("sc").unwrap();
        assert_eq!(report.cycles_pruned, 1);
        assert_eq!(report.jobs_aged, vec![f1.id, i1.id]);
        assert_eq!(report.checkpoints_removed.len(), 1);

        let remaining = engine.checkpoints().list("sc").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].job_id, f2.id);
        assert!(remaining[0].start_time >= f2.start_time);
        assert!(!engine.archive().exists(f1.metadata_object.as_deref().unwrap()));
        assert_eq!(engine.cycles("sc").unwrap().len(), 1);

        let main = engine.main_database("sc").unwrap().unwrap();
        let index = IndexDb::open_read_only(Path::new(&main.path)).unwrap();
        assert_eq!(index.item_job_ids().unwrap(), vec![f2.id]);
    }

    #[test]
    fn test_removes_superseded_databases() {
        let (_dir, engine) = setup(IndexStrategy::CreateNew, 1);
        let f1 = run(&engine, JobLevel::Full, 100);
        run(&engine, JobLevel::Incremental, 200);
        run(&engine, JobLevel::Full, 300);

        let old = engine
            .databases("sc")
            .unwrap()
            .into_iter()
            .find(|d| d.guid == f1.database_guid)
            .unwrap();
        assert!(Path::new(&old.path).exists());

        let report = engine.pruner().prune("sc").unwrap();
        assert_eq!(report.databases_removed, vec![f1.database_guid.clone()]);
        assert!(!Path::new(&old.path).exists());
        assert!(engine.archive().list_for_database(&f1.database_guid).unwrap().is_empty());
        for cp in engine.checkpoints().list("sc").unwrap() {
            assert_ne!(cp.database_guid, f1.database_guid);
        }
    }

    #[test]
    fn test_lowering_retention_applies_on_next_prune() {
        let (_dir, engine) = setup(IndexStrategy::Reuse, 3);
        for start in [100, 200, 300] {
            run(&engine, JobLevel::Full, start);
        }
        assert_eq!(engine.pruner().prune("sc").unwrap().cycles_pruned, 0);

        engine
            .update_entity(
                "sc",
                &UpdateEntityRequest {
                    retention_cycles: Some(1),
                    index_strategy: None,
                },
            )
            .unwrap();
        let aging = engine.pruner().prune_all().unwrap();
        assert!(aging.failures.is_empty());
        assert_eq!(aging.reports[0].cycles_pruned, 2);
        assert_eq!(engine.cycles("sc").unwrap().len(), 1);
    }
}
