use crate::utils::errors::{CatalogError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseStatus {
    Active,
    Superseded,
    Pruned,
}

text_enum!(DatabaseStatus {
    Active => "active",
    Superseded => "superseded",
    Pruned => "pruned",
});

/// Control-store record of one catalog database file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDatabaseRecord {
    pub guid: String,
    pub entity_id: String,
    pub path: String,
    pub status: DatabaseStatus,
    pub created_at: String,
}

fn row_to_database(row: &Row) -> rusqlite::Result<CatalogDatabaseRecord> {
    Ok(CatalogDatabaseRecord {
        guid: row.get("guid")?,
        entity_id: row.get("entity_id")?,
        path: row.get("path")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
    })
}

pub fn find_by_guid(conn: &Connection, guid: &str) -> Result<Option<CatalogDatabaseRecord>> {
    let record = conn
        .query_row(
            "SELECT * FROM catalog_databases WHERE guid = ?",
            params![guid],
            row_to_database,
        )
        .optional()?;
    Ok(record)
}

pub fn find_by_entity(conn: &Connection, entity_id: &str) -> Result<Vec<CatalogDatabaseRecord>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM catalog_databases WHERE entity_id = ? ORDER BY created_at, rowid",
    )?;
    let rows = stmt.query_map(params![entity_id], row_to_database)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn create(conn: &Connection, guid: &str, entity_id: &str, path: &str) -> Result<CatalogDatabaseRecord> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO catalog_databases (guid, entity_id, path, status, created_at)
         VALUES (?1, ?2, ?3, 'active', ?4)",
        params![guid, entity_id, path, now],
    )?;
    find_by_guid(conn, guid)?
        .ok_or_else(|| CatalogError::NotFound(format!("catalog database {guid} after insert")))
}

pub fn set_status(conn: &Connection, guid: &str, status: DatabaseStatus) -> Result<()> {
    conn.execute(
        "UPDATE catalog_databases SET status = ? WHERE guid = ?",
        params![status, guid],
    )?;
    Ok(())
}

// ── Main database indirection (entity_id → database_guid) ──

pub fn find_main(conn: &Connection, entity_id: &str) -> Result<Option<CatalogDatabaseRecord>> {
    let record = conn
        .query_row(
            "SELECT d.* FROM main_databases m
             JOIN catalog_databases d ON d.guid = m.database_guid
             WHERE m.entity_id = ?",
            params![entity_id],
            row_to_database,
        )
        .optional()?;
    Ok(record)
}

pub fn set_main(conn: &Connection, entity_id: &str, guid: &str) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO main_databases (entity_id, database_guid, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(entity_id) DO UPDATE SET database_guid = excluded.database_guid, updated_at = excluded.updated_at",
        params![entity_id, guid, now],
    )?;
    Ok(())
}
