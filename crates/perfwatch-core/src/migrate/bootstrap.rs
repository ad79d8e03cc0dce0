//! 0 -> 1: core metadata tables and the two built-in suites.
//!
//! This is the only step that accepts databases created before versioning
//! existed; anything already present is kept.

use super::MigrationContext;
use crate::model::{MachineField, OrderField, SampleField, SampleType, StatusKind, Suite};
use crate::schema::core::core_snapshot;
use crate::schema::snapshot;
use crate::storage::metadata;
use rusqlite::{params, OptionalExtension};

pub const NTS: &str = "nts";
pub const COMPILE: &str = "compile";

fn machine_field(name: &str) -> MachineField {
    MachineField {
        name: name.to_string(),
        info_key: name.to_string(),
    }
}

fn revision_order() -> OrderField {
    OrderField {
        name: "llvm_project_revision".to_string(),
        info_key: "run_order".to_string(),
        ordinal: 0,
    }
}

/// The "nts" suite as first registered.
pub fn nts_definition() -> Suite {
    let mut ts = Suite::new(NTS, "NT", "");
    ts.machine_fields = vec![machine_field("hardware"), machine_field("os")];
    ts.order_fields = vec![revision_order()];
    ts.sample_fields = vec![
        SampleField::real("compile_time", ".compile").gated_by("compile_status"),
        SampleField::status("compile_status", ".compile.status"),
        SampleField::real("execution_time", ".exec").gated_by("execution_status"),
        SampleField::status("execution_status", ".exec.status"),
    ];
    ts
}

/// The "compile" suite as first registered; every value has a status companion.
pub fn compile_definition() -> Suite {
    let mut ts = Suite::new(COMPILE, "Compile", "");
    ts.machine_fields = vec![machine_field("hardware"), machine_field("os_version")];
    ts.order_fields = vec![revision_order()];
    for (name, unit) in [
        ("user", "time"),
        ("sys", "time"),
        ("wall", "time"),
        ("size", "bytes"),
        ("mem", "bytes"),
    ] {
        let status = format!("{}_status", name);
        ts.sample_fields
            .push(SampleField::status(&status, &format!("{}.status", name)));
        ts.sample_fields.push(
            SampleField::real(&format!("{}_{}", name, unit), &format!("{}.{}", name, unit))
                .gated_by(&status),
        );
    }
    ts
}

pub fn upgrade(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    if ctx.table_exists("TestSuite")? {
        tracing::info!(
            event = "perfwatch.migrate.bootstrap_existing",
            "suite registry already present; filling in missing pieces only"
        );
    }
    ctx.create_all(&core_snapshot(1))?;

    ctx.transaction(|tx| {
        for kind in StatusKind::ALL {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT Name FROM StatusKind WHERE ID = ?1",
                    params![kind.id()],
                    |r| r.get(0),
                )
                .optional()?;
            if existing.is_none() {
                tx.execute(
                    "INSERT INTO StatusKind (ID, Name) VALUES (?1, ?2)",
                    params![kind.id(), kind.name()],
                )?;
            }
        }
        for ty in [SampleType::Real, SampleType::Status] {
            ensure_sample_type(tx, ty)?;
        }
        for definition in [nts_definition(), compile_definition()] {
            if metadata::find_suite(tx, &definition.name)?.is_none() {
                metadata::insert_suite(tx, &definition)?;
            }
        }
        Ok(())
    })?;

    for name in [NTS, COMPILE] {
        let suite = ctx.require_suite(name)?;
        ctx.create_all(&snapshot(1, &suite))?;
    }
    Ok(())
}

pub(crate) fn ensure_sample_type(conn: &rusqlite::Connection, ty: SampleType) -> anyhow::Result<()> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT ID FROM SampleType WHERE Name = ?1",
            params![ty.as_str()],
            |r| r.get(0),
        )
        .optional()?;
    if existing.is_none() {
        conn.execute(
            "INSERT INTO SampleType (Name) VALUES (?1)",
            params![ty.as_str()],
        )?;
    }
    Ok(())
}
