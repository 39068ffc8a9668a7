//! Engine facade: owns the control store pool, the archive store and the
//! per-entity coordination state, and hands out the component managers.

use crate::archive::ArchiveStore;
use crate::browse::synth::Synthesizer;
use crate::browse::Resolver;
use crate::catalog::{self, CompactionReport, IndexDb};
use crate::checkpoint::CheckpointManager;
use crate::config::EngineConfig;
use crate::cycle::{build_cycles, Cycle};
use crate::db::connection::{close_pool, create_pool, DbPool};
use crate::db::migrate::migrate;
use crate::models::catalog_db::{self, CatalogDatabaseRecord};
use crate::models::entity::{self, BackupEntity, CreateEntityRequest, UpdateEntityRequest};
use crate::models::job::{self, Job};
use crate::models::settings;
use crate::prune::PruneManager;
use crate::utils::errors::{CatalogError, Result};
use dashmap::{DashMap, DashSet};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

pub type DbConn = PooledConnection<SqliteConnectionManager>;

pub struct CatalogEngine {
    pub(crate) db: DbPool,
    pub(crate) archive: ArchiveStore,
    pub(crate) config: EngineConfig,
    /// Prune takes these exclusively, resolution and snapshots share them
    entity_locks: DashMap<String, Arc<RwLock<()>>>,
    /// Entities with an active writer (running job or compaction)
    writers: DashSet<String>,
}

impl CatalogEngine {
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;
        std::fs::create_dir_all(config.index_root())?;

        // Browse sessions never outlive the process that opened them
        let sessions = config.sessions_root();
        if sessions.exists() {
            std::fs::remove_dir_all(&sessions)?;
        }
        std::fs::create_dir_all(&sessions)?;

        let db = create_pool(&config.control_db_path())?;
        migrate(&db)?;
        let archive = ArchiveStore::new(config.archive_root(), config.checkpoint.compression_level)?;

        let writers = DashSet::new();
        {
            let conn = db.get()?;
            settings::seed(
                &conn,
                settings::INLINE_CHECKPOINTING,
                if config.checkpoint.inline { "1" } else { "0" },
            )?;
            for running in job::find_running(&conn)? {
                warn!(job_id = running.id, entity_id = %running.entity_id, "Job still running from a previous process");
                writers.insert(running.entity_id);
            }
        }

        info!(data_dir = %config.data_dir.display(), "Catalog engine opened");

        Ok(Self {
            db,
            archive,
            config,
            entity_locks: DashMap::new(),
            writers,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn archive(&self) -> &ArchiveStore {
        &self.archive
    }

    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.db.get()?)
    }

    pub fn close(&self) {
        close_pool(&self.db);
    }

    pub fn checkpoints(&self) -> CheckpointManager<'_> {
        CheckpointManager::new(self)
    }

    pub fn pruner(&self) -> PruneManager<'_> {
        PruneManager::new(self)
    }

    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(self)
    }

    pub fn synthesizer(&self) -> Synthesizer<'_> {
        Synthesizer::new(self)
    }

    // ── Coordination ──

    pub(crate) fn entity_lock(&self, entity_id: &str) -> Arc<RwLock<()>> {
        self.entity_locks
            .entry(entity_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    pub(crate) fn claim_writer(&self, entity_id: &str) -> Result<()> {
        if self.writers.insert(entity_id.to_string()) {
            Ok(())
        } else {
            Err(CatalogError::WriterBusy(entity_id.to_string()))
        }
    }

    pub(crate) fn release_writer(&self, entity_id: &str) {
        self.writers.remove(entity_id);
    }

    pub fn has_active_writer(&self, entity_id: &str) -> bool {
        self.writers.contains(entity_id)
    }

    pub(crate) fn database_path(&self, entity_id: &str, guid: &str) -> PathBuf {
        self.config
            .index_root()
            .join(entity_id)
            .join(format!("{guid}.db"))
    }

    /// Create a catalog database file and make it the entity's main database.
    pub(crate) fn create_database(&self, conn: &Connection, entity_id: &str) -> Result<CatalogDatabaseRecord> {
        let guid = Uuid::new_v4().to_string();
        let path = self.database_path(entity_id, &guid);
        IndexDb::create(&path)?;
        let record = catalog_db::create(conn, &guid, entity_id, &path.to_string_lossy())?;
        catalog_db::set_main(conn, entity_id, &guid)?;
        info!(entity_id, database_guid = %guid, "Catalog database created");
        Ok(record)
    }

    // ── Entities ──

    pub fn create_entity(&self, request: &CreateEntityRequest) -> Result<BackupEntity> {
        validate_entity_id(&request.id)?;
        let conn = self.conn()?;
        let created = entity::create(&conn, request, self.config.retention.default_cycles)?;
        info!(
            entity_id = %created.id,
            backupset_id = %created.backupset_id,
            retention_cycles = created.retention_cycles,
            index_strategy = %created.index_strategy,
            "Backup entity created"
        );
        Ok(created)
    }

    pub fn entity(&self, entity_id: &str) -> Result<BackupEntity> {
        let conn = self.conn()?;
        entity::find_by_id(&conn, entity_id)?
            .ok_or_else(|| CatalogError::NotFound(format!("entity {entity_id}")))
    }

    pub fn entities(&self) -> Result<Vec<BackupEntity>> {
        let conn = self.conn()?;
        entity::find_all(&conn)
    }

    /// Retention changes take effect on the next prune.
    pub fn update_entity(&self, entity_id: &str, request: &UpdateEntityRequest) -> Result<BackupEntity> {
        let conn = self.conn()?;
        let updated = entity::update(&conn, entity_id, request)?
            .ok_or_else(|| CatalogError::NotFound(format!("entity {entity_id}")))?;
        info!(
            entity_id,
            retention_cycles = updated.retention_cycles,
            index_strategy = %updated.index_strategy,
            "Backup entity updated"
        );
        Ok(updated)
    }

    // ── Reads ──

    pub fn job(&self, job_id: i64) -> Result<Job> {
        let conn = self.conn()?;
        job::get(&conn, job_id)
    }

    pub fn jobs(&self, entity_id: &str) -> Result<Vec<Job>> {
        let conn = self.conn()?;
        job::find_by_entity(&conn, entity_id)
    }

    pub fn cycles(&self, entity_id: &str) -> Result<Vec<Cycle>> {
        Ok(build_cycles(&self.jobs(entity_id)?))
    }

    pub fn main_database(&self, entity_id: &str) -> Result<Option<CatalogDatabaseRecord>> {
        let conn = self.conn()?;
        catalog_db::find_main(&conn, entity_id)
    }

    pub fn databases(&self, entity_id: &str) -> Result<Vec<CatalogDatabaseRecord>> {
        let conn = self.conn()?;
        catalog_db::find_by_entity(&conn, entity_id)
    }

    // ── Settings ──

    pub fn inline_checkpointing(&self) -> Result<bool> {
        let conn = self.conn()?;
        settings::inline_checkpointing(&conn)
    }

    /// Turning it off stops new checkpoints; existing ones stay valid.
    pub fn set_inline_checkpointing(&self, enabled: bool) -> Result<()> {
        let conn = self.conn()?;
        settings::set_inline_checkpointing(&conn, enabled)?;
        info!(enabled, "Inline checkpointing updated");
        Ok(())
    }

    // ── Maintenance ──

    /// Compact the main database, then prune.
    pub fn compact(&self, entity_id: &str) -> Result<CompactionReport> {
        self.entity(entity_id)?;
        self.claim_writer(entity_id)?;
        let result = self.compact_main(entity_id);
        self.release_writer(entity_id);
        let report = result?;

        self.pruner().prune(entity_id)?;
        Ok(report)
    }

    fn compact_main(&self, entity_id: &str) -> Result<CompactionReport> {
        let lock = self.entity_lock(entity_id);
        let _exclusive = lock.write().map_err(|_| poisoned(entity_id))?;
        let main = self
            .main_database(entity_id)?
            .ok_or_else(|| CatalogError::NotFound(format!("main database of entity {entity_id}")))?;
        catalog::compact(
            Path::new(&main.path),
            &main.guid,
            self.config.checkpoint.max_attempts,
        )
    }
}

pub(crate) fn poisoned(entity_id: &str) -> CatalogError {
    CatalogError::InvalidState(format!("lock of entity {entity_id} is poisoned"))
}

/// Entity ids name directories under the index root.
fn validate_entity_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(CatalogError::InvalidInput(format!("invalid entity id '{id}'")))
    }
}
