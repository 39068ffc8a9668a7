//! One catalog database file: the ordered log of item metadata keyed by job,
//! with lookup structures by job and by path.

use crate::catalog::{CatalogItem, ItemRecord};
use crate::models::job::JobLevel;
use crate::utils::errors::{CatalogError, Result};
use rusqlite::{params, Connection, OpenFlags, Row};
use std::path::{Path, PathBuf};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
  job_id INTEGER PRIMARY KEY,
  level TEXT NOT NULL,
  start_time INTEGER NOT NULL,
  end_time INTEGER
);

CREATE TABLE IF NOT EXISTS items (
  job_id INTEGER NOT NULL,
  path TEXT NOT NULL,
  size INTEGER NOT NULL,
  mtime INTEGER NOT NULL,
  deleted INTEGER NOT NULL DEFAULT 0,
  checksum TEXT,
  PRIMARY KEY (job_id, path)
);

CREATE INDEX IF NOT EXISTS idx_items_path ON items(path, job_id);
"#;

pub struct IndexDb {
    path: PathBuf,
    conn: Connection,
}

fn row_to_item(row: &Row) -> rusqlite::Result<CatalogItem> {
    Ok(CatalogItem {
        path: row.get("path")?,
        size: row.get::<_, i64>("size")? as u64,
        mtime: row.get("mtime")?,
        deleted: row.get::<_, i64>("deleted")? != 0,
        checksum: row.get("checksum")?,
    })
}

fn row_to_record(row: &Row) -> rusqlite::Result<ItemRecord> {
    Ok(ItemRecord {
        job_id: row.get("job_id")?,
        item: row_to_item(row)?,
    })
}

impl IndexDb {
    /// Create (or open) a catalog database file and make sure its schema exists
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    /// Open an existing catalog database for writing
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(CatalogError::NotFound(format!(
                "catalog database {}",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    pub fn open_read_only(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(CatalogError::NotFound(format!(
                "catalog database {}",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            path: path.to_path_buf(),
            conn,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Register a job in this database; a later call may fill in the end time.
    pub fn record_job(
        &self,
        job_id: i64,
        level: JobLevel,
        start_time: i64,
        end_time: Option<i64>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO jobs (job_id, level, start_time, end_time) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(job_id) DO UPDATE SET end_time = COALESCE(excluded.end_time, jobs.end_time)",
            params![job_id, level, start_time, end_time],
        )?;
        Ok(())
    }

    /// Append items for `job_id`. Re-appending a (job, path) pair is a no-op;
    /// returns how many records were new.
    pub fn append(&mut self, job_id: i64, items: &[CatalogItem]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO items (job_id, path, size, mtime, deleted, checksum)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for item in items {
                if item.path.is_empty() {
                    return Err(CatalogError::InvalidInput("item path must not be empty".into()));
                }
                inserted += stmt.execute(params![
                    job_id,
                    item.path,
                    item.size as i64,
                    item.mtime,
                    item.deleted as i64,
                    item.checksum,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn items_for_job(&self, job_id: i64) -> Result<Vec<CatalogItem>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM items WHERE job_id = ? ORDER BY path")?;
        let rows = stmt.query_map(params![job_id], row_to_item)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn items_for_jobs(&self, job_ids: &[i64]) -> Result<Vec<ItemRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM items WHERE job_id = ? ORDER BY path")?;
        let mut records = Vec::new();
        for job_id in job_ids {
            let rows = stmt.query_map(params![job_id], row_to_record)?;
            for row in rows {
                records.push(row?);
            }
        }
        Ok(records)
    }

    /// Every recorded version of one path, newest job first.
    pub fn versions_of_path(&self, path: &str) -> Result<Vec<ItemRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM items WHERE path = ? ORDER BY job_id DESC")?;
        let rows = stmt.query_map(params![path], row_to_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Jobs registered in this database, ascending.
    pub fn job_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare("SELECT job_id FROM jobs ORDER BY job_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Jobs that own at least one item, ascending.
    pub fn item_job_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT job_id FROM items ORDER BY job_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Physically remove aged jobs and their items.
    pub fn purge_jobs(&mut self, job_ids: &[i64]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        {
            let mut items = tx.prepare("DELETE FROM items WHERE job_id = ?")?;
            let mut jobs = tx.prepare("DELETE FROM jobs WHERE job_id = ?")?;
            for job_id in job_ids {
                removed += items.execute(params![job_id])?;
                jobs.execute(params![job_id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Write a consistent, vacuumed copy of this database to `dest`.
    pub fn snapshot_to(&self, dest: &Path) -> Result<()> {
        if dest.exists() {
            std::fs::remove_file(dest)?;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let dest_str = dest.to_string_lossy().to_string();
        self.conn.execute("VACUUM INTO ?1", params![dest_str])?;
        Ok(())
    }
}
