use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_entries (
    namespace       TEXT NOT NULL,
    key             TEXT NOT NULL,
    value_json      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    PRIMARY KEY (namespace, key)
);
"#;

/// A stored value and the RFC 3339 timestamp of its last write.
pub type EntryRow = (String, String);

/// Open (or create) the preset database. Pass `None` for an in-memory database.
pub fn open_database(path: Option<&std::path::Path>) -> Result<Connection> {
    let conn = match path {
        Some(p) => Connection::open(p).context("Failed to open preset database")?,
        None => Connection::open_in_memory().context("Failed to open in-memory database")?,
    };

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;",
    )
    .context("Failed to set PRAGMA options")?;

    conn.execute_batch(SCHEMA)
        .context("Failed to create preset schema")?;

    Ok(conn)
}

/// Insert or replace an entry.
pub fn put_entry(
    conn: &Connection,
    namespace: &str,
    key: &str,
    value_json: &str,
    updated_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO kv_entries (namespace, key, value_json, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(namespace, key)
         DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
        params![namespace, key, value_json, updated_at],
    )
    .context("Failed to write preset entry")?;
    Ok(())
}

/// Fetch one entry as `(value_json, updated_at)`.
pub fn get_entry(conn: &Connection, namespace: &str, key: &str) -> Result<Option<EntryRow>> {
    conn.query_row(
        "SELECT value_json, updated_at FROM kv_entries WHERE namespace = ?1 AND key = ?2",
        params![namespace, key],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
    .context("Failed to read preset entry")
}

/// Delete one entry. Returns whether a row existed.
pub fn delete_entry(conn: &Connection, namespace: &str, key: &str) -> Result<bool> {
    let count = conn
        .execute(
            "DELETE FROM kv_entries WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )
        .context("Failed to delete preset entry")?;
    Ok(count > 0)
}

/// List the keys of a namespace in alphabetical order.
pub fn list_keys(conn: &Connection, namespace: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT key FROM kv_entries WHERE namespace = ?1 ORDER BY key ASC")
        .context("Failed to prepare list_keys query")?;

    let rows = stmt
        .query_map(params![namespace], |row| row.get(0))
        .context("Failed to execute list_keys query")?;

    let mut keys = Vec::new();
    for row in rows {
        keys.push(row.context("Failed to read key row")?);
    }
    Ok(keys)
}
