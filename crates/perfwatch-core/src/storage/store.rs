use crate::errors::StoreError;
use anyhow::Context;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        Self::from_connection(conn)
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::LockPoisoned.into())
    }

    pub fn table_exists(&self, table: &str) -> anyhow::Result<bool> {
        let conn = self.lock()?;
        table_exists(&conn, table)
    }

    pub fn count_rows(&self, table: &str) -> anyhow::Result<i64> {
        let conn = self.lock()?;
        if !table_exists(&conn, table)? {
            return Err(StoreError::UnknownTable(table.to_string()).into());
        }
        row_count(&conn, table)
    }
}

pub fn table_exists(conn: &Connection, table: &str) -> anyhow::Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// User tables, excluding sqlite internals.
pub fn table_names(conn: &Connection) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn index_names(conn: &Connection) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'index' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn get_columns(conn: &Connection, table: &str) -> anyhow::Result<HashSet<String>> {
    Ok(column_list(conn, table)?.into_iter().collect())
}

/// Columns in declaration order.
pub fn column_list(conn: &Connection, table: &str) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table.replace('"', "\"\"")))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn row_count(conn: &Connection, table: &str) -> anyhow::Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM \"{}\"", table.replace('"', "\"\""));
    let n: i64 = conn
        .query_row(&sql, [], |r| r.get(0))
        .with_context(|| format!("count rows of {}", table))?;
    Ok(n)
}

/// Decodes a `Parameters` cell written either as TEXT or as BLOB.
pub fn parameters_from_value(value: ValueRef<'_>) -> anyhow::Result<Vec<(String, String)>> {
    let raw = match value {
        ValueRef::Null => return Ok(Vec::new()),
        ValueRef::Text(t) | ValueRef::Blob(t) => t,
        other => anyhow::bail!("unexpected Parameters type: {:?}", other.data_type()),
    };
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    let parsed: Vec<(String, serde_json::Value)> =
        serde_json::from_slice(raw).context("failed to parse Parameters JSON")?;
    Ok(parsed
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect())
}

/// Sorted `[key, value]` pairs, the canonical Parameters encoding.
pub fn parameters_to_json(mut pairs: Vec<(String, String)>) -> anyhow::Result<String> {
    pairs.sort();
    Ok(serde_json::to_string(&pairs)?)
}
