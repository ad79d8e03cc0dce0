//! 13 -> 14: the "compile" suite switches to a table prefix equal to its name.
//!
//! If nothing was ever recorded under `Compile_*` the tables and the suite
//! registration are dropped. Otherwise every table is renamed to `compile_*`.

use super::bootstrap::COMPILE;
use super::MigrationContext;
use crate::storage::metadata;
use crate::storage::store::row_count;
use rusqlite::params;

/// Children first, so drops never leave dangling references behind.
const ENTITIES: &[&str] = &[
    "Baseline",
    "ChangeIgnore",
    "RegressionIndicator",
    "FieldChange",
    "FieldChangeV2",
    "Profile",
    "Regression",
    "Sample",
    "Run",
    "Order",
    "Test",
    "Machine",
];

const OLD_PREFIX: &str = "Compile";

pub fn upgrade(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    let suite = ctx.require_suite(COMPILE)?;
    let suite_id = suite.id.unwrap_or_default();

    let mut present = Vec::new();
    let mut all_empty = true;
    for entity in ENTITIES {
        let table = format!("{}_{}", OLD_PREFIX, entity);
        match ctx.table_exists(&table) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                ctx.warn(format!("could not inspect {}: {:#}", table, e));
                continue;
            }
        }
        match row_count(ctx.conn(), &table) {
            Ok(0) => {}
            Ok(_) => all_empty = false,
            Err(e) => {
                ctx.warn(format!("could not count rows of {}: {:#}", table, e));
                all_empty = false;
            }
        }
        present.push((*entity, table));
    }

    if all_empty {
        tracing::info!(event = "perfwatch.migrate.compile_drop", tables = present.len());
        for (_, table) in &present {
            if let Err(e) = ctx.drop_table(table) {
                ctx.warn(format!("failed to drop {}: {:#}", table, e));
            }
        }
        ctx.transaction(|tx| {
            metadata::delete_suite(tx, suite_id)?;
            tx.execute(
                "DELETE FROM TestSuiteJSONSchemas WHERE TestSuiteName = ?1",
                params![COMPILE],
            )?;
            Ok(())
        })?;
    } else {
        tracing::info!(event = "perfwatch.migrate.compile_rename", tables = present.len());
        for (entity, table) in &present {
            let new_name = format!("{}_{}", COMPILE, entity);
            if let Err(e) = ctx.rename_table(table, &new_name) {
                ctx.warn(format!("failed to rename {} to {}: {:#}", table, new_name, e));
            }
        }
        ctx.transaction(|tx| {
            tx.execute(
                "UPDATE TestSuite SET DBKeyName = ?1 WHERE Name = ?1",
                params![COMPILE],
            )?;
            Ok(())
        })?;
    }
    Ok(())
}
