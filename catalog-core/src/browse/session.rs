//! Browse session: scratch space for restored and synthesized databases,
//! plus the item records gathered from every selected source. The scratch
//! directory goes away with the session, whether the browse succeeded, failed
//! or was cancelled.

use crate::browse::synth::TempDatabase;
use crate::browse::{BrowseResult, ResolvedSource};
use crate::catalog::{IndexDb, ItemRecord};
use crate::models::checkpoint::Checkpoint;
use crate::models::job::Job;
use crate::utils::errors::{CatalogError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const RESTORE_MANIFEST: &str = "restore-manifest.json";

const STAGING_DIR: &str = "restore-staging";

/// Databases a restore wrote into its target directory.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreReport {
    pub target: PathBuf,
    pub databases: Vec<String>,
    pub entries: usize,
}

#[derive(Serialize)]
struct RestoreManifest<'a> {
    entity_id: &'a str,
    sources: &'a [ResolvedSource],
    databases: &'a [String],
    entries: &'a [ItemRecord],
}

pub struct BrowseSession {
    id: String,
    entity_id: String,
    dir: PathBuf,
    show_deleted: bool,
    sources: Vec<ResolvedSource>,
    /// (file name in a restore target, file to copy from)
    files: Vec<(String, PathBuf)>,
    /// Main database to snapshot on restore, with its guid
    main_database: Option<(String, PathBuf)>,
    temp_databases: Vec<String>,
    records: Vec<ItemRecord>,
}

impl BrowseSession {
    pub(crate) fn create(root: &Path, entity_id: &str, show_deleted: bool) -> Result<Self> {
        let id = Uuid::new_v4().to_string();
        let dir = root.join(&id);
        fs::create_dir_all(&dir)?;
        debug!(session = %id, entity_id, "Browse session opened");
        Ok(Self {
            id,
            entity_id: entity_id.to_string(),
            dir,
            show_deleted,
            sources: Vec::new(),
            files: Vec::new(),
            main_database: None,
            temp_databases: Vec::new(),
            records: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn sources(&self) -> &[ResolvedSource] {
        &self.sources
    }

    /// Read the assigned jobs straight from the live main database.
    pub(crate) fn attach_main(&mut self, guid: &str, path: &Path, jobs: &[Job]) -> Result<()> {
        let job_ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();
        let db = IndexDb::open_read_only(path)?;
        self.records.extend(db.items_for_jobs(&job_ids)?);
        self.main_database = Some((guid.to_string(), path.to_path_buf()));
        self.sources.push(ResolvedSource::MainDatabase {
            database_guid: guid.to_string(),
            job_ids,
        });
        Ok(())
    }

    pub(crate) fn attach_checkpoint(&mut self, checkpoint: &Checkpoint, file: PathBuf, jobs: &[Job]) -> Result<()> {
        let job_ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();
        let db = IndexDb::open_read_only(&file)?;
        self.records.extend(db.items_for_jobs(&job_ids)?);
        self.files.push((format!("{}.db", checkpoint.backing_object_id), file));
        self.sources.push(ResolvedSource::Checkpoint {
            checkpoint_id: checkpoint.id,
            backing_object_id: checkpoint.backing_object_id.clone(),
            database_guid: checkpoint.database_guid.clone(),
            start_time: checkpoint.start_time,
            end_time: checkpoint.end_time,
            job_ids,
        });
        Ok(())
    }

    pub(crate) fn attach_temp(&mut self, temp: TempDatabase) -> Result<()> {
        let db = IndexDb::open_read_only(&temp.path)?;
        self.records.extend(db.items_for_jobs(&temp.job_ids)?);
        self.files.push((format!("{}.db", temp.name), temp.path.clone()));
        self.temp_databases.push(temp.name.clone());
        self.sources.push(ResolvedSource::TempDatabase {
            name: temp.name,
            job_ids: temp.job_ids,
        });
        Ok(())
    }

    /// Latest version of every path across all sources; the highest job id
    /// wins. Tombstones are dropped unless the session shows deleted items.
    pub fn entries(&self) -> Vec<ItemRecord> {
        merge_latest(&self.records, self.show_deleted)
    }

    pub fn into_result(mut self) -> BrowseResult {
        BrowseResult {
            entries: self.entries(),
            sources: std::mem::take(&mut self.sources),
            temp_databases: std::mem::take(&mut self.temp_databases),
        }
    }

    /// Copy every resolved database into `target`, with a manifest naming
    /// the sources and the merged entries. Everything is staged inside the
    /// session directory and renamed into place at the end; a failed or
    /// cancelled restore leaves no `target` behind.
    pub fn materialize(&self, target: &Path, cancel: &CancellationToken) -> Result<RestoreReport> {
        if target.exists() {
            return Err(CatalogError::InvalidState(format!(
                "restore target {} already exists",
                target.display()
            )));
        }
        let staging = self.dir.join(STAGING_DIR);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;
        let mut databases = Vec::new();

        if let Some((guid, path)) = &self.main_database {
            let name = format!("{guid}.db");
            IndexDb::open_read_only(path)?.snapshot_to(&staging.join(&name))?;
            databases.push(name);
        }
        for (name, src) in &self.files {
            if cancel.is_cancelled() {
                return Err(CatalogError::Cancelled);
            }
            fs::copy(src, staging.join(name))?;
            databases.push(name.clone());
        }

        let entries = self.entries();
        let manifest = RestoreManifest {
            entity_id: &self.entity_id,
            sources: &self.sources,
            databases: &databases,
            entries: &entries,
        };
        fs::write(staging.join(RESTORE_MANIFEST), serde_json::to_vec_pretty(&manifest)?)?;

        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&staging, target)?;

        info!(
            session = %self.id,
            target = %target.display(),
            databases = databases.len(),
            entries = entries.len(),
            "Catalog restored"
        );
        Ok(RestoreReport {
            target: target.to_path_buf(),
            databases,
            entries: entries.len(),
        })
    }
}

impl Drop for BrowseSession {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => debug!(session = %self.id, "Browse session cleaned up"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(session = %self.id, error = %e, "Failed to clean up browse session"),
        }
    }
}

pub(crate) fn merge_latest(records: &[ItemRecord], show_deleted: bool) -> Vec<ItemRecord> {
    let mut latest: BTreeMap<&str, &ItemRecord> = BTreeMap::new();
    for record in records {
        match latest.get(record.item.path.as_str()) {
            Some(existing) if existing.job_id >= record.job_id => {}
            _ => {
                latest.insert(record.item.path.as_str(), record);
            }
        }
    }
    latest
        .into_values()
        .filter(|r| show_deleted || !r.item.deleted)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogItem;

    fn record(job_id: i64, path: &str, deleted: bool) -> ItemRecord {
        ItemRecord {
            job_id,
            item: CatalogItem {
                path: path.into(),
                size: job_id as u64,
                mtime: 0,
                deleted,
                checksum: None,
            },
        }
    }

    #[test]
    fn test_highest_job_wins() {
        let records = vec![
            record(3, "/a", false),
            record(1, "/a", false),
            record(1, "/b", false),
            record(2, "/b", true),
            record(1, "/c", false),
        ];

        let visible = merge_latest(&records, false);
        let paths: Vec<_> = visible.iter().map(|r| (r.item.path.as_str(), r.job_id)).collect();
        assert_eq!(paths, vec![("/a", 3), ("/c", 1)]);

        let all = merge_latest(&records, true);
        assert_eq!(all.len(), 3);
        assert!(all.iter().any(|r| r.item.path == "/b" && r.item.deleted));
    }

    #[test]
    fn test_scratch_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let session = BrowseSession::create(root.path(), "sc", false).unwrap();
        let dir = session.dir().to_path_buf();
        fs::write(dir.join("scratch.db"), b"x").unwrap();
        assert!(dir.exists());
        drop(session);
        assert!(!dir.exists());
    }

    fn session_with_files(root: &Path, files: Vec<(String, PathBuf)>) -> BrowseSession {
        let mut session = BrowseSession::create(&root.join("sessions"), "sc", false).unwrap();
        session.files = files;
        session.records = vec![record(1, "/a", false)];
        session
    }

    #[test]
    fn test_failed_copy_leaves_no_target() {
        let root = tempfile::tempdir().unwrap();
        let present = root.path().join("present.db");
        fs::write(&present, b"db").unwrap();
        let session = session_with_files(
            root.path(),
            vec![
                ("present.db".into(), present),
                ("missing.db".into(), root.path().join("missing.db")),
            ],
        );

        let target = root.path().join("restores").join("r1");
        assert!(session.materialize(&target, &CancellationToken::new()).is_err());
        assert!(!target.exists());

        // Staging goes away with the session
        let dir = session.dir().to_path_buf();
        drop(session);
        assert!(!dir.exists());
    }

    #[test]
    fn test_cancelled_restore_leaves_no_target() {
        let root = tempfile::tempdir().unwrap();
        let src = root.path().join("cp.db");
        fs::write(&src, b"db").unwrap();
        let session = session_with_files(root.path(), vec![("cp.db".into(), src)]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let target = root.path().join("restores").join("r1");
        let err = session.materialize(&target, &cancel).unwrap_err();
        assert!(matches!(err, CatalogError::Cancelled));
        assert!(!target.exists());
    }

    #[test]
    fn test_materialize_moves_staging_into_place() {
        let root = tempfile::tempdir().unwrap();
        let src = root.path().join("cp.db");
        fs::write(&src, b"db").unwrap();
        let session = session_with_files(root.path(), vec![("cp.db".into(), src)]);

        let target = root.path().join("restores").join("r1");
        let report = session.materialize(&target, &CancellationToken::new()).unwrap();
        assert_eq!(report.databases, vec!["cp.db".to_string()]);
        assert_eq!(report.entries, 1);
        assert!(target.join("cp.db").is_file());
        assert!(target.join(RESTORE_MANIFEST).is_file());
        assert!(!session.dir().join(STAGING_DIR).exists());

        // A second restore to the same target is refused and leaves it intact
        let err = session.materialize(&target, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidState(_)));
        assert!(target.join("cp.db").is_file());
    }
}
