mod common;

use catalog_core::archive::is_checkpoint_object;
use catalog_core::catalog::IndexDb;
use catalog_core::{CatalogError, IndexStrategy, JobLevel};
use common::*;
use std::path::Path;

#[test]
fn checkpoints_only_ever_belong_to_full_backups() {
    let t = catalog(true);
    add_entity(&t.engine, "sc", IndexStrategy::CreateNew, 5);

    run_job(&t.engine, "sc", JobLevel::Full, 0, &[item("/a", 1)]);
    run_job(&t.engine, "sc", JobLevel::Incremental, 100, &[item("/b", 1)]);
    run_job(&t.engine, "sc", JobLevel::Differential, 200, &[item("/c", 1)]);
    run_job(&t.engine, "sc", JobLevel::SyntheticFull, 300, &[item("/a", 2)]);
    run_job(&t.engine, "sc", JobLevel::Incremental, 400, &[item("/d", 1)]);
    t.engine.checkpoints().checkpoint("sc", false).unwrap();

    let jobs = t.engine.jobs("sc").unwrap();
    let checkpoints = t.engine.checkpoints().list("sc").unwrap();
    assert!(!checkpoints.is_empty());
    for cp in &checkpoints {
        let job = jobs.iter().find(|j| j.id == cp.job_id).unwrap();
        assert!(job.level.opens_cycle(), "checkpoint {} hangs off {}", cp.id, job.level);
    }
}

#[test]
fn retained_jobs_stay_covered_after_prune() {
    let t = catalog(true);
    add_entity(&t.engine, "sc", IndexStrategy::CreateNew, 2);

    let mut start = 0;
    for _cycle in 0..4 {
        run_job(&t.engine, "sc", JobLevel::Full, start, &[item("/f", start as u64)]);
        run_job(&t.engine, "sc", JobLevel::Incremental, start + 100, &[item("/i", 1)]);
        start += 1000;
    }
    t.engine.pruner().prune("sc").unwrap();

    let cycles = t.engine.cycles("sc").unwrap();
    assert_eq!(cycles.len(), 2);
    let main = t.engine.main_database("sc").unwrap().unwrap();
    let checkpoints = t.engine.checkpoints().list("sc").unwrap();

    for job in cycles.iter().flat_map(|c| c.jobs.iter()) {
        let in_main = job.database_guid == main.guid;
        let by_checkpoint = checkpoints.iter().any(|cp| cp.is_valid() && cp.covers(job));
        assert!(in_main || by_checkpoint, "job {} is not covered", job.id);
    }
}

#[test]
fn prune_with_one_retained_cycle_drops_older_checkpoints() {
    let t = catalog(true);
    add_entity(&t.engine, "sc", IndexStrategy::Reuse, 1);

    let f1 = run_job(&t.engine, "sc", JobLevel::Full, 0, &[item("/a", 1)]);
    let f2 = run_job(&t.engine, "sc", JobLevel::Full, 1000, &[item("/a", 2)]);
    let f3 = run_job(&t.engine, "sc", JobLevel::Full, 2000, &[item("/a", 3)]);

    let before = t.engine.checkpoints().list("sc").unwrap();
    let old: Vec<_> = before
        .iter()
        .filter(|cp| cp.job_id == f1.id || cp.job_id == f2.id)
        .cloned()
        .collect();
    assert_eq!(old.len(), 2);

    let report = t.engine.pruner().prune("sc").unwrap();
    assert_eq!(report.cycles_pruned, 2);

    let after = t.engine.checkpoints().list("sc").unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].job_id, f3.id);
    assert!(after[0].is_valid());
    assert!(t.engine.archive().exists(&after[0].backing_object_id));
    for cp in &old {
        assert!(!t.engine.archive().exists(&cp.backing_object_id));
    }

    let remaining: Vec<_> = t
        .engine
        .archive()
        .list()
        .unwrap()
        .into_iter()
        .filter(|id| is_checkpoint_object(id))
        .collect();
    assert_eq!(remaining, vec![after[0].backing_object_id.clone()]);
}

#[test]
fn compaction_keeps_committed_jobs_identical() {
    let t = catalog(false);
    add_entity(&t.engine, "sc", IndexStrategy::Reuse, 3);

    let mut jobs = Vec::new();
    let items: Vec<_> = (0..300).map(|n| item(&format!("/data/file-{n:04}"), n)).collect();
    jobs.push(run_job(&t.engine, "sc", JobLevel::Full, 0, &items));
    jobs.push(run_job(&t.engine, "sc", JobLevel::Incremental, 100, &[item("/data/file-0001", 77), tombstone("/data/file-0002")]));
    jobs.push(run_job(&t.engine, "sc", JobLevel::Full, 200, &items[..50]));

    let main = t.engine.main_database("sc").unwrap().unwrap();
    let snapshot = |path: &Path| -> Vec<String> {
        let db = IndexDb::open_read_only(path).unwrap();
        jobs.iter()
            .map(|j| serde_json::to_string(&db.items_for_job(j.id).unwrap()).unwrap())
            .collect()
    };
    let before = snapshot(Path::new(&main.path));

    let report = t.engine.compact("sc").unwrap();
    assert_eq!(report.database_guid, main.guid);
    assert_eq!(snapshot(Path::new(&main.path)), before);
}

#[test]
fn compaction_is_refused_while_a_job_writes() {
    let t = catalog(false);
    add_entity(&t.engine, "sc", IndexStrategy::Reuse, 3);
    let job = t.engine.start_job("sc", JobLevel::Full, ts(0)).unwrap();

    let err = t.engine.compact("sc").unwrap_err();
    assert!(matches!(err, CatalogError::WriterBusy(_)));

    t.engine.finish_job(job.id, ts(10)).unwrap();
    t.engine.compact("sc").unwrap();
}

#[test]
fn failed_checkpoint_completes_job_with_degraded_protection() {
    let t = catalog(true);
    add_entity(&t.engine, "sc", IndexStrategy::Reuse, 3);

    let job = t.engine.start_job("sc", JobLevel::Full, ts(0)).unwrap();
    t.engine.append_items(job.id, &[item("/a", 1)]).unwrap();
    t.engine.end_data_phase(job.id, ts(10)).unwrap();

    // the database file vanishes before the snapshot
    let main = t.engine.main_database("sc").unwrap().unwrap();
    std::fs::remove_file(&main.path).unwrap();

    let outcome = t.engine.run_checkpoint_phase(job.id).unwrap();
    assert!(outcome.degraded.is_some());
    assert!(outcome.checkpoints.is_empty());
    assert_eq!(outcome.job.status, catalog_core::JobStatus::Completed);
    assert_eq!(outcome.job.checkpoint_state, catalog_core::CheckpointState::Skipped);
    assert!(outcome.job.checkpoint_error.is_some());
    assert!(!t.engine.has_active_writer("sc"));
}
