//! Linear, numbered schema migrations.
//!
//! Step `n` moves a database from version `n - 1` to `n`. The version is kept
//! in `SchemaVersion` under the `__core__` key and persisted after every
//! successful step, so a failure leaves the database at the last completed
//! version.

pub mod bootstrap;
pub mod context;
mod compile_suite;
mod indexes;
mod run_orders;
mod steps;

pub use context::MigrationContext;

use crate::errors::MigrationError;
use crate::schema::core::{schema_version_table, CORE_VERSION_KEY, SCHEMA_VERSION_TABLE};
use crate::storage::store::table_exists;
use crate::storage::{DdlCompiler, Dialect, Store};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

pub const CURRENT_VERSION: u32 = 19;

pub type StepFn = fn(&mut MigrationContext<'_>) -> anyhow::Result<()>;

pub struct Step {
    pub from: u32,
    pub to: u32,
    pub name: &'static str,
    pub apply: StepFn,
}

const fn step(from: u32, name: &'static str, apply: StepFn) -> Step {
    Step {
        from,
        to: from + 1,
        name,
        apply,
    }
}

pub static STEPS: &[Step] = &[
    step(0, "bootstrap_core_and_builtin_suites", bootstrap::upgrade),
    step(1, "recompute_run_orders", run_orders::upgrade),
    step(2, "add_field_change", steps::add_field_change),
    step(3, "add_bigger_is_better", steps::add_bigger_is_better),
    step(4, "add_nts_score", steps::add_nts_score),
    step(5, "add_nts_mem_bytes", steps::add_nts_mem_bytes),
    step(6, "add_hash_sample_type", steps::add_nts_hash),
    step(7, "add_regression_tracking", steps::add_regression_tracking),
    step(8, "add_profiles", steps::add_profiles),
    step(9, "add_nts_code_size", steps::add_nts_code_size),
    step(10, "add_baselines", steps::add_baselines),
    step(11, "rename_machine_name_parameter", steps::rename_machine_name_parameter),
    step(12, "add_json_schemas", steps::add_json_schemas),
    step(13, "fold_compile_suite", compile_suite::upgrade),
    step(14, "drop_legacy_field_change", steps::drop_legacy_field_change),
    step(15, "index_field_change_start_order", indexes::field_change_start_order),
    step(16, "index_regression_indicator", indexes::regression_indicator),
    step(17, "add_ignore_same_hash", steps::add_ignore_same_hash),
    step(18, "unique_field_change_identity", indexes::field_change_identity),
];

#[derive(Debug, Clone, Serialize)]
pub struct AppliedStep {
    pub from: u32,
    pub to: u32,
    pub name: &'static str,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub initial_version: u32,
    pub final_version: u32,
    /// The database had metadata tables but no version marker.
    pub legacy: bool,
    pub applied: Vec<AppliedStep>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub current: u32,
    pub latest: u32,
    pub versioned: bool,
    pub pending: Vec<String>,
}

pub fn read_version(conn: &Connection) -> anyhow::Result<Option<u32>> {
    if !table_exists(conn, SCHEMA_VERSION_TABLE)? {
        return Ok(None);
    }
    let v: Option<i64> = conn
        .query_row(
            "SELECT Version FROM SchemaVersion WHERE Name = ?1",
            params![CORE_VERSION_KEY],
            |r| r.get(0),
        )
        .optional()?;
    Ok(v.map(|v| v.max(0) as u32))
}

fn write_version(conn: &Connection, version: u32) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO SchemaVersion (Name, Version) VALUES (?1, ?2)
         ON CONFLICT(Name) DO UPDATE SET Version = excluded.Version",
        params![CORE_VERSION_KEY, version],
    )?;
    Ok(())
}

pub struct Migrator<'s> {
    store: &'s Store,
    ddl: DdlCompiler,
}

impl<'s> Migrator<'s> {
    pub fn new(store: &'s Store) -> Self {
        Self {
            store,
            ddl: DdlCompiler::new(Dialect::Sqlite),
        }
    }

    pub fn current_version(&self) -> anyhow::Result<u32> {
        let conn = self.store.lock()?;
        Ok(read_version(&conn)?.unwrap_or(0))
    }

    pub fn status(&self) -> anyhow::Result<MigrationStatus> {
        let conn = self.store.lock()?;
        let stored = read_version(&conn)?;
        let current = stored.unwrap_or(0);
        let pending = STEPS
            .iter()
            .filter(|s| s.from >= current)
            .map(|s| format!("{} -> {}: {}", s.from, s.to, s.name))
            .collect();
        Ok(MigrationStatus {
            current,
            latest: CURRENT_VERSION,
            versioned: stored.is_some(),
            pending,
        })
    }

    pub fn apply_all(&self) -> anyhow::Result<MigrationReport> {
        self.apply_to(CURRENT_VERSION)
    }

    /// Applies pending steps up to and including `target`.
    pub fn apply_to(&self, target: u32) -> anyhow::Result<MigrationReport> {
        let started_at = Utc::now();
        let mut conn = self.store.lock()?;

        let stored = read_version(&conn)?;
        let legacy = stored.is_none() && table_exists(&conn, "TestSuite")?;
        if legacy {
            tracing::warn!(
                event = "perfwatch.migrate.unversioned",
                "database has suite metadata but no version marker; treating as version 0"
            );
        }
        let current = stored.unwrap_or(0);
        if current > CURRENT_VERSION {
            return Err(MigrationError::FutureVersion {
                found: current,
                supported: CURRENT_VERSION,
            }
            .into());
        }
        if target > CURRENT_VERSION || target < current {
            return Err(MigrationError::InvalidTarget { current, target }.into());
        }
        if stored.is_none() {
            conn.execute_batch(&self.ddl.create_table(&schema_version_table()))?;
            write_version(&conn, 0)?;
        }

        let mut applied = Vec::new();
        for step in STEPS.iter().filter(|s| s.from >= current && s.to <= target) {
            tracing::info!(
                event = "perfwatch.migrate.step",
                from = step.from,
                to = step.to,
                name = step.name,
                "applying migration {} -> {}",
                step.from,
                step.to
            );
            let mut ctx = MigrationContext::new(&mut conn, self.ddl, step.to);
            let outcome = (step.apply)(&mut ctx);
            let warnings = ctx.take_warnings();
            if let Err(cause) = outcome.and_then(|_| write_version(&conn, step.to)) {
                tracing::error!(
                    event = "perfwatch.migrate.failed",
                    from = step.from,
                    to = step.to,
                    error = %format!("{:#}", cause)
                );
                return Err(MigrationError::Step {
                    from: step.from,
                    to: step.to,
                    name: step.name,
                    cause,
                }
                .into());
            }
            applied.push(AppliedStep {
                from: step.from,
                to: step.to,
                name: step.name,
                warnings,
            });
        }

        let final_version = read_version(&conn)?.unwrap_or(0);
        tracing::info!(
            event = "perfwatch.migrate.done",
            from = current,
            to = final_version,
            steps = applied.len()
        );
        Ok(MigrationReport {
            initial_version: current,
            final_version,
            legacy,
            applied,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_form_a_contiguous_chain() {
        for (i, s) in STEPS.iter().enumerate() {
            assert_eq!(s.from, i as u32);
            assert_eq!(s.to, s.from + 1);
        }
        assert_eq!(STEPS.last().map(|s| s.to), Some(CURRENT_VERSION));
    }
}
