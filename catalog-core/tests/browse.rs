mod common;

use catalog_core::archive::checkpoint_object_id;
use catalog_core::browse::RESTORE_MANIFEST;
use catalog_core::catalog::IndexDb;
use catalog_core::{BrowseRequest, CatalogError, IndexStrategy, JobLevel, ResolvedSource};
use common::*;
use std::path::Path;
use tokio_util::sync::CancellationToken;

#[test]
fn job_browse_in_oldest_retained_cycle_reads_main_database() {
    let t = catalog(true);
    add_entity(&t.engine, "sc", IndexStrategy::Reuse, 2);

    run_job(&t.engine, "sc", JobLevel::Full, 0, &[item("/old", 1)]);
    let f2 = run_job(&t.engine, "sc", JobLevel::Full, 1000, &[item("/a", 1), item("/b", 1)]);
    let i2 = run_job(&t.engine, "sc", JobLevel::Incremental, 1100, &[item("/a", 2), tombstone("/b")]);
    run_job(&t.engine, "sc", JobLevel::Full, 2000, &[item("/a", 3)]);
    t.engine.pruner().prune("sc").unwrap();

    let result = t
        .engine
        .resolver()
        .browse(&BrowseRequest::for_job("sc", i2.id))
        .unwrap();

    let main = t.engine.main_database("sc").unwrap().unwrap();
    assert_eq!(
        result.sources,
        vec![ResolvedSource::MainDatabase {
            database_guid: main.guid.clone(),
            job_ids: vec![f2.id, i2.id],
        }]
    );
    assert!(result.temp_databases.is_empty());

    // same answer as reading the main database directly
    let db = IndexDb::open_read_only(Path::new(&main.path)).unwrap();
    let direct = db.items_for_jobs(&[f2.id, i2.id]).unwrap();
    let a = direct.iter().filter(|r| r.item.path == "/a").max_by_key(|r| r.job_id).unwrap();
    assert_eq!(result.entries.len(), 1);
    assert_eq!(result.entries[0], *a);
    assert_eq!(result.entries[0].item.size, 2);
}

#[test]
fn uncovered_cycle_is_synthesized_exactly() {
    let t = catalog(false);
    add_entity(&t.engine, "sc", IndexStrategy::CreateNew, 3);

    let f1 = run_job(&t.engine, "sc", JobLevel::Full, 0, &[item("/a", 1)]);
    let i1 = run_job(&t.engine, "sc", JobLevel::Incremental, 100, &[item("/b", 1)]);
    run_job(&t.engine, "sc", JobLevel::Full, 1000, &[item("/a", 2)]);
    assert!(t.engine.checkpoints().list("sc").unwrap().is_empty());

    let result = t
        .engine
        .resolver()
        .browse(&BrowseRequest::for_range("sc", f1.start_time, i1.end_time.unwrap()))
        .unwrap();

    assert_eq!(result.temp_databases.len(), 1);
    let name = &result.temp_databases[0];
    assert!(name.starts_with("temp_sc_"));
    match &result.sources[..] {
        [ResolvedSource::TempDatabase { job_ids, .. }] => assert_eq!(job_ids, &vec![f1.id, i1.id]),
        other => panic!("unexpected sources {other:?}"),
    }
    let paths: Vec<_> = result.entries.iter().map(|r| r.item.path.as_str()).collect();
    assert_eq!(paths, vec!["/a", "/b"]);

    // synthesizing directly yields exactly the two jobs
    let out = t.dir.path().join("synth");
    std::fs::create_dir_all(&out).unwrap();
    let temp = t
        .engine
        .synthesizer()
        .synthesize("sc", &[f1.clone(), i1.clone()], &out)
        .unwrap();
    let db = IndexDb::open_read_only(&temp.path).unwrap();
    let mut seen = db.job_ids().unwrap();
    seen.extend(db.item_job_ids().unwrap());
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen, vec![f1.id, i1.id]);
}

#[test]
fn range_browse_restores_sealing_checkpoint_without_synthesis() {
    let t = catalog(true);
    add_entity(&t.engine, "sc", IndexStrategy::CreateNew, 3);

    let f1 = run_job(&t.engine, "sc", JobLevel::Full, 0, &[item("/a", 1), item("/b", 1)]);
    let i1 = run_job(&t.engine, "sc", JobLevel::Incremental, 100, &[item("/a", 2)]);
    let i2 = run_job(&t.engine, "sc", JobLevel::Incremental, 200, &[tombstone("/b")]);
    let s1 = run_job(&t.engine, "sc", JobLevel::SyntheticFull, 300, &[item("/a", 2)]);

    let request = BrowseRequest::for_range("sc", f1.start_time, i2.end_time.unwrap()).show_deleted(true);
    let result = t.engine.resolver().browse(&request).unwrap();

    assert!(result.temp_databases.is_empty());
    match &result.sources[..] {
        [ResolvedSource::Checkpoint {
            backing_object_id,
            database_guid,
            start_time,
            end_time,
            job_ids,
            ..
        }] => {
            assert_eq!(backing_object_id, &checkpoint_object_id(&f1.database_guid, s1.id));
            assert_eq!(database_guid, &f1.database_guid);
            assert_eq!(*start_time, f1.start_time);
            assert_eq!(*end_time, i2.end_time.unwrap());
            assert_eq!(job_ids, &vec![f1.id, i1.id, i2.id]);
        }
        other => panic!("unexpected sources {other:?}"),
    }

    let b = result.entries.iter().find(|r| r.item.path == "/b").unwrap();
    assert!(b.item.deleted);
    assert_eq!(b.job_id, i2.id);
    let a = result.entries.iter().find(|r| r.item.path == "/a").unwrap();
    assert_eq!((a.job_id, a.item.size), (i1.id, 2));
}

#[test]
fn invalidated_checkpoint_falls_back_to_synthesis() {
    let t = catalog(true);
    add_entity(&t.engine, "sc", IndexStrategy::CreateNew, 3);

    let f1 = run_job(&t.engine, "sc", JobLevel::Full, 0, &[item("/a", 1)]);
    let i1 = run_job(&t.engine, "sc", JobLevel::Incremental, 100, &[item("/b", 1)]);
    run_job(&t.engine, "sc", JobLevel::Full, 1000, &[item("/a", 2)]);

    let seal = t
        .engine
        .checkpoints()
        .list("sc")
        .unwrap()
        .into_iter()
        .find(|cp| cp.database_guid == f1.database_guid && cp.covers(&i1))
        .unwrap();
    t.engine.checkpoints().invalidate(seal.id).unwrap();

    let result = t
        .engine
        .resolver()
        .browse(&BrowseRequest::for_job("sc", i1.id))
        .unwrap();

    // the full's own checkpoint still answers for it; the increment is rebuilt
    assert_eq!(result.temp_databases.len(), 1);
    let covered: Vec<i64> = result.sources.iter().flat_map(|s| s.job_ids().to_vec()).collect();
    assert!(covered.contains(&f1.id));
    assert!(covered.contains(&i1.id));
    assert_eq!(result.entries.len(), 2);
}

#[test]
fn cancelled_browse_leaves_no_session_behind() {
    let t = catalog(true);
    add_entity(&t.engine, "sc", IndexStrategy::Reuse, 2);
    let f1 = run_job(&t.engine, "sc", JobLevel::Full, 0, &[item("/a", 1)]);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = t
        .engine
        .resolver()
        .browse_with(&BrowseRequest::for_job("sc", f1.id), &cancel)
        .unwrap_err();
    assert!(matches!(err, CatalogError::Cancelled));
    assert_eq!(session_dirs(&t), 0);
}

#[test]
fn unknown_job_and_empty_range_are_not_found() {
    let t = catalog(false);
    add_entity(&t.engine, "sc", IndexStrategy::Reuse, 2);
    run_job(&t.engine, "sc", JobLevel::Full, 1000, &[item("/a", 1)]);

    let err = t
        .engine
        .resolver()
        .browse(&BrowseRequest::for_job("sc", 4242))
        .unwrap_err();
    assert!(matches!(err, CatalogError::ResolutionNotFound { .. }));

    let err = t
        .engine
        .resolver()
        .browse(&BrowseRequest::for_range("sc", ts(0), ts(10)))
        .unwrap_err();
    assert!(matches!(err, CatalogError::ResolutionNotFound { .. }));
}

#[test]
fn missing_checkpoint_object_reports_resolution_context() {
    let t = catalog(true);
    add_entity(&t.engine, "sc", IndexStrategy::CreateNew, 3);
    let f1 = run_job(&t.engine, "sc", JobLevel::Full, 0, &[item("/a", 1)]);
    run_job(&t.engine, "sc", JobLevel::Full, 1000, &[item("/a", 2)]);

    for cp in t.engine.checkpoints().list("sc").unwrap() {
        if cp.database_guid == f1.database_guid {
            t.engine.archive().delete(&cp.backing_object_id).unwrap();
        }
    }

    let err = t
        .engine
        .resolver()
        .browse(&BrowseRequest::for_job("sc", f1.id))
        .unwrap_err();
    match err {
        CatalogError::Resolution { entity_id, range, source, .. } => {
            assert_eq!(entity_id, "sc");
            assert_eq!(range, format!("job {}", f1.id));
            assert!(matches!(*source, CatalogError::ObjectNotFound(_)));
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(session_dirs(&t), 0);
}

#[test]
fn restore_materializes_databases_and_manifest() {
    let t = catalog(true);
    add_entity(&t.engine, "sc", IndexStrategy::CreateNew, 3);
    let f1 = run_job(&t.engine, "sc", JobLevel::Full, 0, &[item("/a", 1)]);
    run_job(&t.engine, "sc", JobLevel::Incremental, 100, &[item("/b", 1)]);
    let f2 = run_job(&t.engine, "sc", JobLevel::Full, 1000, &[item("/c", 1)]);

    let target = t.dir.path().join("restore");
    let report = t
        .engine
        .resolver()
        .restore(
            &BrowseRequest::for_range("sc", f1.start_time, f2.end_time.unwrap()),
            &target,
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(report.entries, 3);
    assert_eq!(report.databases.len(), 2);
    for name in &report.databases {
        assert!(target.join(name).is_file(), "{name} missing");
    }
    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(target.join(RESTORE_MANIFEST)).unwrap()).unwrap();
    assert_eq!(manifest["entity_id"], "sc");
    assert_eq!(manifest["sources"].as_array().unwrap().len(), 2);
    assert_eq!(session_dirs(&t), 0);
}
