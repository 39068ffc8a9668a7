use crate::utils::errors::{CatalogError, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

/// Whether a Full/SyntheticFull opens a fresh catalog database or keeps
/// appending to the current one. Resolved once at cycle start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStrategy {
    CreateNew,
    #[default]
    Reuse,
}

text_enum!(IndexStrategy {
    CreateNew => "create_new",
    Reuse => "reuse",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntity {
    pub id: String,
    pub backupset_id: String,
    pub retention_cycles: u32,
    pub index_strategy: IndexStrategy,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateEntityRequest {
    pub id: String,
    pub backupset_id: String,
    #[serde(default)]
    pub retention_cycles: Option<u32>,
    #[serde(default)]
    pub index_strategy: IndexStrategy,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEntityRequest {
    pub retention_cycles: Option<u32>,
    pub index_strategy: Option<IndexStrategy>,
}

fn row_to_entity(row: &Row) -> rusqlite::Result<BackupEntity> {
    Ok(BackupEntity {
        id: row.get("id")?,
        backupset_id: row.get("backupset_id")?,
        retention_cycles: row.get("retention_cycles")?,
        index_strategy: row.get("index_strategy")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn find_all(conn: &Connection) -> Result<Vec<BackupEntity>> {
    let mut stmt = conn.prepare("SELECT * FROM entities ORDER BY id")?;
    let rows = stmt.query_map([], row_to_entity)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<BackupEntity>> {
    let entity = conn
        .query_row("SELECT * FROM entities WHERE id = ?", params![id], row_to_entity)
        .optional()?;
    Ok(entity)
}

pub fn find_by_backupset(conn: &Connection, backupset_id: &str) -> Result<Vec<BackupEntity>> {
    let mut stmt = conn.prepare("SELECT * FROM entities WHERE backupset_id = ? ORDER BY id")?;
    let rows = stmt.query_map(params![backupset_id], row_to_entity)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn create(conn: &Connection, data: &CreateEntityRequest, default_cycles: u32) -> Result<BackupEntity> {
    if data.id.trim().is_empty() {
        return Err(CatalogError::InvalidInput("entity id must not be empty".into()));
    }
    let retention_cycles = data.retention_cycles.unwrap_or(default_cycles);
    if retention_cycles == 0 {
        return Err(CatalogError::InvalidInput("retention_cycles must be at least 1".into()));
    }
    if find_by_id(conn, &data.id)?.is_some() {
        return Err(CatalogError::InvalidInput(format!("entity {} already exists", data.id)));
    }

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO entities (id, backupset_id, retention_cycles, index_strategy, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            data.id,
            data.backupset_id,
            retention_cycles,
            data.index_strategy,
            now,
            now,
        ],
    )?;
    find_by_id(conn, &data.id)?
        .ok_or_else(|| CatalogError::NotFound(format!("entity {} after insert", data.id)))
}

pub fn update(conn: &Connection, id: &str, data: &UpdateEntityRequest) -> Result<Option<BackupEntity>> {
    if find_by_id(conn, id)?.is_none() {
        return Ok(None);
    }

    let mut sets = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(cycles) = data.retention_cycles {
        if cycles == 0 {
            return Err(CatalogError::InvalidInput("retention_cycles must be at least 1".into()));
        }
        sets.push("retention_cycles = ?");
        values.push(Box::new(cycles));
    }
    if let Some(strategy) = data.index_strategy {
        sets.push("index_strategy = ?");
        values.push(Box::new(strategy));
    }

    if sets.is_empty() {
        return find_by_id(conn, id);
    }

    sets.push("updated_at = ?");
    values.push(Box::new(chrono::Utc::now().to_rfc3339()));
    values.push(Box::new(id.to_string()));

    let sql = format!("UPDATE entities SET {} WHERE id = ?", sets.join(", "));
    let params: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    conn.execute(&sql, params.as_slice())?;
    find_by_id(conn, id)
}
