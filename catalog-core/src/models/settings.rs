use crate::utils::errors::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;

pub const INLINE_CHECKPOINTING: &str = "inline_checkpointing";

pub fn get(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(value)
}

pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// Writes `value` only when the key has never been set.
pub fn seed(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

pub fn get_all(conn: &Connection) -> Result<HashMap<String, String>> {
    let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut map = HashMap::new();
    for r in rows {
        let (k, v) = r?;
        map.insert(k, v);
    }
    Ok(map)
}

/// Process-wide inline checkpointing switch; off unless set.
pub fn inline_checkpointing(conn: &Connection) -> Result<bool> {
    Ok(get(conn, INLINE_CHECKPOINTING)?.as_deref() == Some("1"))
}

pub fn set_inline_checkpointing(conn: &Connection, enabled: bool) -> Result<()> {
    set(conn, INLINE_CHECKPOINTING, if enabled { "1" } else { "0" })
}
