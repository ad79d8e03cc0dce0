//! Reads and writes the suite registry and field metadata tables.
//!
//! Older schema versions lack some columns (`bigger_is_better` before 4,
//! `ignore_same_hash` before 18); readers fall back to defaults and writers
//! skip them.

use super::store::{get_columns, table_exists};
use crate::errors::SchemaError;
use crate::model::{MachineField, OrderField, RunField, SampleField, SampleType, Suite};
use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuiteRef {
    pub id: i64,
    pub name: String,
    pub db_key_name: String,
}

pub fn registered_suites(conn: &Connection) -> anyhow::Result<Vec<SuiteRef>> {
    if !table_exists(conn, "TestSuite")? {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare("SELECT ID, Name, DBKeyName FROM TestSuite ORDER BY ID")?;
    let rows = stmt.query_map([], |r| {
        Ok(SuiteRef {
            id: r.get(0)?,
            name: r.get(1)?,
            db_key_name: r.get(2)?,
        })
    })?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn find_suite(conn: &Connection, name: &str) -> anyhow::Result<Option<SuiteRef>> {
    Ok(registered_suites(conn)?.into_iter().find(|s| s.name == name))
}

pub fn sample_type_id(conn: &Connection, ty: SampleType) -> anyhow::Result<i64> {
    conn.query_row(
        "SELECT ID FROM SampleType WHERE Name = ?1",
        params![ty.as_str()],
        |r| r.get(0),
    )
    .optional()?
    .ok_or_else(|| {
        SchemaError::NotFound {
            entity: "sample type",
            identifier: ty.as_str().to_string(),
        }
        .into()
    })
}

pub fn sample_field_id(conn: &Connection, suite_id: i64, name: &str) -> anyhow::Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT ID FROM TestSuiteSampleFields WHERE TestSuiteID = ?1 AND Name = ?2",
            params![suite_id, name],
            |r| r.get(0),
        )
        .optional()?)
}

/// ID of the field `status` gating `field`; it must exist and be of type Status.
fn status_field_id(conn: &Connection, suite_id: i64, field: &str, status: &str) -> anyhow::Result<i64> {
    let found: Option<(i64, String)> = conn
        .query_row(
            "SELECT f.ID, t.Name FROM TestSuiteSampleFields f
             JOIN SampleType t ON t.ID = f.Type
             WHERE f.TestSuiteID = ?1 AND f.Name = ?2",
            params![suite_id, status],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let (id, type_name) = found.ok_or_else(|| SchemaError::NotFound {
        entity: "status field",
        identifier: status.to_string(),
    })?;
    if type_name != SampleType::Status.as_str() {
        let suite: String = conn
            .query_row("SELECT Name FROM TestSuite WHERE ID = ?1", params![suite_id], |r| r.get(0))
            .optional()?
            .unwrap_or_else(|| suite_id.to_string());
        return Err(SchemaError::InvalidStatusField {
            suite,
            field: field.to_string(),
            reason: format!("'{}' has type {}", status, type_name),
        }
        .into());
    }
    Ok(id)
}

fn load_named_fields(
    conn: &Connection,
    table: &str,
    suite_id: i64,
) -> anyhow::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT Name, InfoKey FROM {} WHERE TestSuiteID = ?1 ORDER BY ID",
        table
    ))?;
    let rows = stmt.query_map(params![suite_id], |r| Ok((r.get(0)?, r.get(1)?)))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn load_suite(conn: &Connection, name: &str) -> anyhow::Result<Option<Suite>> {
    let row: Option<(i64, String, Option<String>)> = conn
        .query_row(
            "SELECT ID, DBKeyName, Version FROM TestSuite WHERE Name = ?1",
            params![name],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((id, db_key_name, version)) = row else {
        return Ok(None);
    };

    let mut suite = Suite::new(name, &db_key_name, version.as_deref().unwrap_or(""));
    suite.id = Some(id);

    suite.machine_fields = load_named_fields(conn, "TestSuiteMachineFields", id)?
        .into_iter()
        .map(|(name, info_key)| MachineField { name, info_key })
        .collect();
    suite.run_fields = load_named_fields(conn, "TestSuiteRunFields", id)?
        .into_iter()
        .map(|(name, info_key)| RunField { name, info_key })
        .collect();

    let mut stmt = conn.prepare(
        "SELECT Name, InfoKey, Ordinal FROM TestSuiteOrderFields
         WHERE TestSuiteID = ?1 ORDER BY Ordinal, ID",
    )?;
    let rows = stmt.query_map(params![id], |r| {
        Ok(OrderField {
            name: r.get(0)?,
            info_key: r.get(1)?,
            ordinal: r.get::<_, Option<i64>>(2)?.unwrap_or(0),
        })
    })?;
    for r in rows {
        suite.order_fields.push(r?);
    }

    suite.sample_fields = load_sample_fields(conn, id)?;
    Ok(Some(suite))
}

fn load_sample_fields(conn: &Connection, suite_id: i64) -> anyhow::Result<Vec<SampleField>> {
    let cols = get_columns(conn, "TestSuiteSampleFields")?;
    let flag = |name: &str| {
        if cols.contains(name) {
            format!("COALESCE(sf.{}, 0)", name)
        } else {
            "0".to_string()
        }
    };
    let sql = format!(
        "SELECT sf.ID, sf.Name, sf.InfoKey, st.Name, sf.status_field, {}, {}
         FROM TestSuiteSampleFields sf
         JOIN SampleType st ON sf.Type = st.ID
         WHERE sf.TestSuiteID = ?1
         ORDER BY sf.ID",
        flag("bigger_is_better"),
        flag("ignore_same_hash"),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![suite_id], |r| {
        Ok((
            r.get::<_, i64>(0)?,
            r.get::<_, String>(1)?,
            r.get::<_, Option<String>>(2)?,
            r.get::<_, String>(3)?,
            r.get::<_, Option<i64>>(4)?,
            r.get::<_, i64>(5)?,
            r.get::<_, i64>(6)?,
        ))
    })?;

    let mut raw = Vec::new();
    for r in rows {
        raw.push(r?);
    }
    let names: HashMap<i64, String> = raw.iter().map(|r| (r.0, r.1.clone())).collect();

    let mut out = Vec::new();
    for (_, name, info_key, type_name, status_id, bib, ish) in raw {
        let sample_type = SampleType::parse(&type_name)
            .with_context(|| format!("unknown sample type '{}' for field {}", type_name, name))?;
        let status_field = match status_id {
            Some(sid) => Some(
                names
                    .get(&sid)
                    .cloned()
                    .with_context(|| format!("status field {} of {} belongs to another suite", sid, name))?,
            ),
            None => None,
        };
        out.push(SampleField {
            name,
            info_key: info_key.unwrap_or_default(),
            sample_type,
            status_field,
            bigger_is_better: bib != 0,
            ignore_same_hash: ish != 0,
        });
    }
    Ok(out)
}

pub fn insert_machine_field(conn: &Connection, suite_id: i64, f: &MachineField) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO TestSuiteMachineFields (TestSuiteID, Name, InfoKey) VALUES (?1, ?2, ?3)",
        params![suite_id, f.name, f.info_key],
    )
    .context("insert machine field")?;
    Ok(())
}

pub fn insert_order_field(conn: &Connection, suite_id: i64, f: &OrderField) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO TestSuiteOrderFields (TestSuiteID, Name, InfoKey, Ordinal) VALUES (?1, ?2, ?3, ?4)",
        params![suite_id, f.name, f.info_key, f.ordinal],
    )
    .context("insert order field")?;
    Ok(())
}

pub fn insert_run_field(conn: &Connection, suite_id: i64, f: &RunField) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO TestSuiteRunFields (TestSuiteID, Name, InfoKey) VALUES (?1, ?2, ?3)",
        params![suite_id, f.name, f.info_key],
    )
    .context("insert run field")?;
    Ok(())
}

/// Appends a sample field row; a referenced status field must already be stored.
pub fn insert_sample_field(conn: &Connection, suite_id: i64, f: &SampleField) -> anyhow::Result<i64> {
    let type_id = sample_type_id(conn, f.sample_type)?;
    let status_id = match f.status_field.as_deref() {
        Some(status) => Some(status_field_id(conn, suite_id, &f.name, status)?),
        None => None,
    };

    let cols = get_columns(conn, "TestSuiteSampleFields")?;
    let mut names = vec!["TestSuiteID", "Name", "InfoKey", "Type", "status_field"];
    let mut values: Vec<rusqlite::types::Value> = vec![
        suite_id.into(),
        f.name.clone().into(),
        f.info_key.clone().into(),
        type_id.into(),
        status_id.into(),
    ];
    if cols.contains("bigger_is_better") {
        names.push("bigger_is_better");
        values.push(i64::from(f.bigger_is_better).into());
    }
    if cols.contains("ignore_same_hash") {
        names.push("ignore_same_hash");
        values.push(i64::from(f.ignore_same_hash).into());
    }
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO TestSuiteSampleFields ({}) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    );
    conn.execute(&sql, rusqlite::params_from_iter(values))
        .with_context(|| format!("insert sample field {}", f.name))?;
    Ok(conn.last_insert_rowid())
}

/// Inserts the suite row and all of its field metadata.
pub fn insert_suite(conn: &Connection, suite: &Suite) -> anyhow::Result<i64> {
    conn.execute(
        "INSERT INTO TestSuite (Name, DBKeyName, Version) VALUES (?1, ?2, ?3)",
        params![suite.name, suite.db_key_name, suite.version],
    )
    .with_context(|| format!("insert test suite {}", suite.name))?;
    let id = conn.last_insert_rowid();

    for f in &suite.machine_fields {
        insert_machine_field(conn, id, f)?;
    }
    for f in &suite.order_fields {
        insert_order_field(conn, id, f)?;
    }
    for f in &suite.run_fields {
        insert_run_field(conn, id, f)?;
    }
    // Status fields go first so gated fields can reference them.
    let (status, rest): (Vec<&SampleField>, Vec<&SampleField>) = suite
        .sample_fields
        .iter()
        .partition(|f| f.sample_type == SampleType::Status);
    for f in status.into_iter().chain(rest) {
        insert_sample_field(conn, id, f)?;
    }
    Ok(id)
}

/// Removes a suite and every field row that belongs to it.
pub fn delete_suite(conn: &Connection, suite_id: i64) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE TestSuiteSampleFields SET status_field = NULL WHERE TestSuiteID = ?1",
        params![suite_id],
    )?;
    for table in [
        "TestSuiteOrderFields",
        "TestSuiteMachineFields",
        "TestSuiteRunFields",
        "TestSuiteSampleFields",
    ] {
        conn.execute(
            &format!("DELETE FROM {} WHERE TestSuiteID = ?1", table),
            params![suite_id],
        )
        .with_context(|| format!("delete rows of {}", table))?;
    }
    conn.execute("DELETE FROM TestSuite WHERE ID = ?1", params![suite_id])?;
    Ok(())
}
