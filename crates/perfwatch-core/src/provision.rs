//! Registering suites and growing their schema on a database that is already
//! at the current version.
//!
//! Every operation here runs in one transaction. On SQLite the DDL takes part
//! in that transaction, so a metadata row and its column are committed
//! together or not at all.

use crate::errors::SchemaError;
use crate::migrate::{read_version, CURRENT_VERSION};
use crate::model::{MachineField, RunField, SampleField, Suite};
use crate::schema::definition::{diff_suites, SuiteChanges, SuiteDefinition};
use crate::schema::suite::sample_column;
use crate::schema::{snapshot, ColumnDef, ColumnType};
use crate::storage::metadata;
use crate::storage::store::get_columns;
use crate::storage::{DdlCompiler, Dialect, Store};
use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;

pub(crate) fn ensure_current(conn: &Connection) -> anyhow::Result<()> {
    let version = read_version(conn)?.unwrap_or(0);
    if version != CURRENT_VERSION {
        anyhow::bail!(
            "database is at schema version {} but {} is required; run `perfwatch migrate` first",
            version,
            CURRENT_VERSION
        );
    }
    Ok(())
}

fn ddl() -> DdlCompiler {
    DdlCompiler::new(Dialect::Sqlite)
}

/// Registers `suite` and creates its tables at the current version.
pub fn create_suite(store: &Store, suite: &Suite, definition_json: Option<&str>) -> anyhow::Result<Suite> {
    suite.validate()?;
    let mut conn = store.lock()?;
    ensure_current(&conn)?;
    if metadata::find_suite(&conn, &suite.name)?.is_some() {
        return Err(SchemaError::Duplicate {
            entity: "test suite",
            identifier: suite.name.clone(),
        }
        .into());
    }

    let tx = conn.transaction()?;
    metadata::insert_suite(&tx, suite)?;
    if let Some(json) = definition_json {
        store_definition(&tx, &suite.name, json)?;
    }
    let registered = metadata::load_suite(&tx, &suite.name)?
        .with_context(|| format!("suite {} missing after insert", suite.name))?;
    for table in &snapshot(CURRENT_VERSION, &registered).tables {
        for sql in ddl().create_table_with_indexes(table) {
            tx.execute_batch(&sql)
                .with_context(|| format!("create table {}", table.name))?;
        }
    }
    tx.commit()?;

    tracing::info!(
        event = "perfwatch.suite.created",
        suite = %registered.name,
        metrics = registered.sample_fields.len()
    );
    Ok(registered)
}

/// Registers a definition file's suite.
pub fn create_suite_from_definition(store: &Store, def: &SuiteDefinition) -> anyhow::Result<Suite> {
    let suite = def.to_suite()?;
    create_suite(store, &suite, Some(&def.canonical_json()?))
}

fn store_definition(tx: &Transaction<'_>, name: &str, json: &str) -> anyhow::Result<()> {
    tx.execute(
        "INSERT INTO TestSuiteJSONSchemas (TestSuiteName, JSONSchema) VALUES (?1, ?2)
         ON CONFLICT(TestSuiteName) DO UPDATE SET JSONSchema = excluded.JSONSchema",
        params![name, json.as_bytes()],
    )?;
    Ok(())
}

/// Stored definition for a suite, if it was created from one.
pub fn stored_definition(store: &Store, name: &str) -> anyhow::Result<Option<SuiteDefinition>> {
    let conn = store.lock()?;
    let raw: Option<Vec<u8>> = conn
        .query_row(
            "SELECT JSONSchema FROM TestSuiteJSONSchemas WHERE TestSuiteName = ?1",
            params![name],
            |r| {
                let v = r.get_ref(0)?;
                Ok(v.as_bytes().map(|b| b.to_vec()).unwrap_or_default())
            },
        )
        .optional()?;
    match raw {
        Some(bytes) => Ok(Some(
            serde_json::from_slice(&bytes).context("stored suite definition is not valid JSON")?,
        )),
        None => Ok(None),
    }
}

fn apply_sample_field(tx: &Transaction<'_>, suite: &Suite, suite_id: i64, field: &SampleField) -> anyhow::Result<()> {
    metadata::insert_sample_field(tx, suite_id, field)?;
    let table = suite.table("Sample");
    if !get_columns(tx, &table)?.contains(&field.name) {
        tx.execute_batch(&ddl().add_column(&table, &sample_column(&field.name, field.sample_type)))
            .with_context(|| format!("add column {}.{}", table, field.name))?;
    }
    Ok(())
}

fn string_column(tx: &Transaction<'_>, table: &str, name: &str) -> anyhow::Result<()> {
    if !get_columns(tx, table)?.contains(name) {
        let col = ColumnDef::new(name, ColumnType::String(256));
        tx.execute_batch(&ddl().add_column(table, &col))
            .with_context(|| format!("add column {}.{}", table, name))?;
    }
    Ok(())
}

/// Appends one sample field and its column to a registered suite.
pub fn add_sample_field(store: &Store, suite_name: &str, field: SampleField) -> anyhow::Result<()> {
    let mut conn = store.lock()?;
    ensure_current(&conn)?;
    let suite = metadata::load_suite(&conn, suite_name)?.ok_or_else(|| SchemaError::NotFound {
        entity: "test suite",
        identifier: suite_name.to_string(),
    })?;
    if suite.sample_field(&field.name).is_some() {
        return Err(SchemaError::Duplicate {
            entity: "sample field",
            identifier: format!("{}.{}", suite_name, field.name),
        }
        .into());
    }
    let mut probe = suite.clone();
    probe.sample_fields.push(field.clone());
    probe.validate()?;

    let suite_id = suite.id.context("registered suite without id")?;
    let tx = conn.transaction()?;
    apply_sample_field(&tx, &suite, suite_id, &field)?;
    tx.commit()?;

    tracing::info!(
        event = "perfwatch.suite.field_added",
        suite = %suite_name,
        field = %field.name,
        sample_type = field.sample_type.as_str()
    );
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub suite: String,
    pub created: bool,
    pub dry_run: bool,
    pub changes: SuiteChanges,
}

/// Brings a suite in line with `def`: creates it if unknown, otherwise
/// applies additive changes. Unsupported changes fail before anything is
/// written.
pub fn sync_suite(store: &Store, def: &SuiteDefinition, dry_run: bool) -> anyhow::Result<SyncReport> {
    let wanted = def.to_suite()?;
    let existing = {
        let conn = store.lock()?;
        ensure_current(&conn)?;
        metadata::load_suite(&conn, &def.name)?
    };

    let Some(existing) = existing else {
        if !dry_run {
            create_suite_from_definition(store, def)?;
        }
        return Ok(SyncReport {
            suite: def.name.clone(),
            created: true,
            dry_run,
            changes: SuiteChanges {
                machine_fields: wanted.machine_fields.clone(),
                run_fields: wanted.run_fields.clone(),
                sample_fields: wanted.sample_fields.clone(),
                bigger_is_better: Vec::new(),
            },
        });
    };

    let changes = diff_suites(&existing, &wanted)?;
    if dry_run {
        return Ok(SyncReport {
            suite: def.name.clone(),
            created: false,
            dry_run,
            changes,
        });
    }

    let suite_id = existing.id.context("registered suite without id")?;
    let mut conn = store.lock()?;
    let tx = conn.transaction()?;
    for f in &changes.machine_fields {
        apply_machine_field(&tx, &existing, suite_id, f)?;
    }
    for f in &changes.run_fields {
        apply_run_field(&tx, &existing, suite_id, f)?;
    }
    for f in &changes.sample_fields {
        apply_sample_field(&tx, &existing, suite_id, f)?;
    }
    for (name, flag) in &changes.bigger_is_better {
        tx.execute(
            "UPDATE TestSuiteSampleFields SET bigger_is_better = ?1
             WHERE TestSuiteID = ?2 AND Name = ?3",
            params![i64::from(*flag), suite_id, name],
        )?;
    }
    store_definition(&tx, &def.name, &def.canonical_json()?)?;
    tx.commit()?;

    tracing::info!(
        event = "perfwatch.suite.synced",
        suite = %def.name,
        added_metrics = changes.sample_fields.len(),
        added_run_fields = changes.run_fields.len(),
        added_machine_fields = changes.machine_fields.len()
    );
    Ok(SyncReport {
        suite: def.name.clone(),
        created: false,
        dry_run,
        changes,
    })
}

fn apply_machine_field(tx: &Transaction<'_>, suite: &Suite, suite_id: i64, f: &MachineField) -> anyhow::Result<()> {
    metadata::insert_machine_field(tx, suite_id, f)?;
    string_column(tx, &suite.table("Machine"), &f.name)
}

fn apply_run_field(tx: &Transaction<'_>, suite: &Suite, suite_id: i64, f: &RunField) -> anyhow::Result<()> {
    metadata::insert_run_field(tx, suite_id, f)?;
    string_column(tx, &suite.table("Run"), &f.name)
}
