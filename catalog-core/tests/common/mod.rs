#![allow(dead_code)]

use catalog_core::models::entity::CreateEntityRequest;
use catalog_core::{CatalogEngine, CatalogItem, EngineConfig, IndexStrategy, Job, JobLevel};
use chrono::{DateTime, Utc};
use tempfile::TempDir;

pub struct TestCatalog {
    pub dir: TempDir,
    pub engine: CatalogEngine,
}

pub fn catalog(inline: bool) -> TestCatalog {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = EngineConfig::with_data_dir(dir.path());
    config.checkpoint.inline = inline;
    let engine = CatalogEngine::open(config).expect("open engine");
    TestCatalog { dir, engine }
}

pub fn add_entity(engine: &CatalogEngine, id: &str, strategy: IndexStrategy, keep: u32) {
    engine
        .create_entity(&CreateEntityRequest {
            id: id.to_string(),
            backupset_id: "bs-1".to_string(),
            retention_cycles: Some(keep),
            index_strategy: strategy,
        })
        .expect("create entity");
}

pub fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("timestamp")
}

pub fn item(path: &str, size: u64) -> CatalogItem {
    CatalogItem {
        path: path.to_string(),
        size,
        mtime: 1_700_000_000,
        deleted: false,
        checksum: Some(format!("{size:016x}")),
    }
}

pub fn tombstone(path: &str) -> CatalogItem {
    CatalogItem {
        path: path.to_string(),
        size: 0,
        mtime: 1_700_000_000,
        deleted: true,
        checksum: None,
    }
}

/// Run a job start to finish; it ends 10 seconds after `start`.
pub fn run_job(engine: &CatalogEngine, entity: &str, level: JobLevel, start: i64, items: &[CatalogItem]) -> Job {
    let job = engine.start_job(entity, level, ts(start)).expect("start job");
    engine.append_items(job.id, items).expect("append items");
    engine
        .finish_job(job.id, ts(start + 10))
        .expect("finish job")
        .job
}

pub fn session_dirs(catalog: &TestCatalog) -> usize {
    std::fs::read_dir(catalog.engine.config().sessions_root())
        .map(|entries| entries.count())
        .unwrap_or(0)
}
