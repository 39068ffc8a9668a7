//! Compaction rewrites a catalog database into a dense copy, proves the copy
//! answers every job identically, then swaps it in.

use crate::catalog::{CatalogItem, IndexDb};
use crate::utils::errors::{CatalogError, Result};
use crate::utils::retry::retry_when;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct CompactionReport {
    pub database_guid: String,
    pub jobs_verified: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub attempts: u32,
}

/// Compact the database at `path`. Every failure (I/O or verification) uses
/// one of `max_attempts` tries; the last one raises `CompactionFailure`.
pub fn compact(path: &Path, database_guid: &str, max_attempts: u32) -> Result<CompactionReport> {
    retry_when("compaction", max_attempts, |_| true, |attempt| {
        compact_once(path, database_guid, attempt)
    })
    .map_err(|exhausted| CatalogError::CompactionFailure {
        database_guid: database_guid.to_string(),
        attempts: exhausted.attempts,
        reason: exhausted.last.to_string(),
    })
}

fn snapshot_jobs(db: &IndexDb) -> Result<BTreeMap<i64, Vec<CatalogItem>>> {
    let mut jobs = BTreeMap::new();
    let mut ids = db.job_ids()?;
    ids.extend(db.item_job_ids()?);
    ids.sort_unstable();
    ids.dedup();
    for job_id in ids {
        jobs.insert(job_id, db.items_for_job(job_id)?);
    }
    Ok(jobs)
}

fn compact_once(path: &Path, database_guid: &str, attempt: u32) -> Result<CompactionReport> {
    let bytes_before = std::fs::metadata(path)?.len();
    let rewritten = path.with_extension("db.compact");

    let before = {
        let db = IndexDb::open(path)?;
        let before = snapshot_jobs(&db)?;
        db.snapshot_to(&rewritten)?;
        before
    };

    let after = {
        let copy = IndexDb::open_read_only(&rewritten)?;
        snapshot_jobs(&copy)?
    };

    if before != after {
        let _ = std::fs::remove_file(&rewritten);
        return Err(CatalogError::InvalidState(format!(
            "compacted copy of {database_guid} differs from the original"
        )));
    }

    std::fs::rename(&rewritten, path)?;
    let bytes_after = std::fs::metadata(path)?.len();

    info!(
        database_guid,
        jobs = before.len(),
        bytes_before,
        bytes_after,
        attempt,
        "Catalog database compacted"
    );

    Ok(CompactionReport {
        database_guid: database_guid.to_string(),
        jobs_verified: before.len(),
        bytes_before,
        bytes_after,
        attempts: attempt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobLevel;

    #[test]
    fn test_compaction_preserves_every_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.db");
        let mut db = IndexDb::create(&path).unwrap();

        for job_id in 1..=4 {
            db.record_job(job_id, JobLevel::Incremental, job_id * 100, Some(job_id * 100 + 50))
                .unwrap();
            let items: Vec<CatalogItem> = (0..200)
                .map(|n| CatalogItem {
                    path: format!("/data/{job_id}/file-{n:04}"),
                    size: n * 7,
                    mtime: 1_700_000_000 + n as i64,
                    deleted: n % 17 == 0,
                    checksum: Some(format!("{n:08x}")),
                })
                .collect();
            db.append(job_id, &items).unwrap();
        }
        db.purge_jobs(&[1, 2]).unwrap();

        let expected: Vec<String> = (3..=4)
            .map(|j| serde_json::to_string(&db.items_for_job(j).unwrap()).unwrap())
            .collect();
        drop(db);

        let report = compact(&path, "guid-1", 3).unwrap();
        assert_eq!(report.jobs_verified, 2);
        assert!(report.bytes_after <= report.bytes_before);
        assert!(!path.with_extension("db.compact").exists());

        let db = IndexDb::open_read_only(&path).unwrap();
        let actual: Vec<String> = (3..=4)
            .map(|j| serde_json::to_string(&db.items_for_job(j).unwrap()).unwrap())
            .collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_compaction_fails_loudly_after_three_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let err = compact(&dir.path().join("gone.db"), "guid-2", 3).unwrap_err();
        match err {
            CatalogError::CompactionFailure {
                database_guid,
                attempts,
                ..
            } => {
                assert_eq!(database_guid, "guid-2");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
