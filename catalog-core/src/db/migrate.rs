use crate::db::connection::DbPool;
use crate::utils::errors::Result;
use rusqlite::Connection;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
  id TEXT PRIMARY KEY,
  backupset_id TEXT NOT NULL,
  retention_cycles INTEGER NOT NULL DEFAULT 2 CHECK(retention_cycles >= 1),
  index_strategy TEXT NOT NULL DEFAULT 'reuse' CHECK(index_strategy IN ('create_new','reuse')),
  created_at TEXT NOT NULL DEFAULT (datetime('now')),
  updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS catalog_databases (
  guid TEXT PRIMARY KEY,
  entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
  path TEXT NOT NULL,
  status TEXT NOT NULL DEFAULT 'active' CHECK(status IN ('active','superseded','pruned')),
  created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS main_databases (
  entity_id TEXT PRIMARY KEY REFERENCES entities(id) ON DELETE CASCADE,
  database_guid TEXT NOT NULL REFERENCES catalog_databases(guid),
  updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS jobs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
  database_guid TEXT NOT NULL REFERENCES catalog_databases(guid),
  level TEXT NOT NULL CHECK(level IN ('full','incremental','differential','synthetic_full')),
  status TEXT NOT NULL DEFAULT 'running' CHECK(status IN ('running','completed','failed','aged')),
  checkpoint_state TEXT NOT NULL DEFAULT 'running' CHECK(checkpoint_state IN ('running','suspended','checkpoint_pending','checkpointed','not_applicable','skipped')),
  resume_state TEXT,
  start_time INTEGER NOT NULL,
  end_time INTEGER,
  metadata_object TEXT,
  created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS checkpoints (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  entity_id TEXT NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
  database_guid TEXT NOT NULL REFERENCES catalog_databases(guid),
  job_id INTEGER NOT NULL REFERENCES jobs(id),
  start_time INTEGER NOT NULL,
  end_time INTEGER NOT NULL,
  valid_flag INTEGER NOT NULL DEFAULT 1 CHECK(valid_flag IN (0,1)),
  backing_object_id TEXT NOT NULL UNIQUE,
  created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS settings (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_entity ON jobs(entity_id, start_time);
CREATE INDEX IF NOT EXISTS idx_jobs_database ON jobs(database_guid);
CREATE INDEX IF NOT EXISTS idx_checkpoints_database ON checkpoints(database_guid, backing_object_id);
CREATE INDEX IF NOT EXISTS idx_checkpoints_entity ON checkpoints(entity_id);
"#;

pub fn migrate(pool: &DbPool) -> Result<()> {
    tracing::info!("[DB] Starting control store migration...");

    let conn = pool.get()?;
    conn.execute_batch(SCHEMA)?;

    // Idempotent migrations for control stores created by older releases
    if !has_column(&conn, "jobs", "checkpoint_error")? {
        conn.execute_batch("ALTER TABLE jobs ADD COLUMN checkpoint_error TEXT")?;
    }

    tracing::info!("[DB] Migration completed successfully");
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(columns.iter().any(|c| c == column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::create_pool;

    #[test]
    fn test_migrate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(&dir.path().join("control.db")).unwrap();

        migrate(&pool).unwrap();
        migrate(&pool).unwrap();

        let conn = pool.get().unwrap();
        assert!(has_column(&conn, "jobs", "checkpoint_error").unwrap());
        assert!(has_column(&conn, "checkpoints", "backing_object_id").unwrap());
        assert!(!has_column(&conn, "checkpoints", "nope").unwrap());
    }
}
