//! Index-only steps. Index creation is an optimisation, so a failure is a
//! warning and the migration carries on.

use super::MigrationContext;
use crate::schema::suite::{change_identity_index, regression_lookup_index, start_order_index};
use rusqlite::{params, Transaction};

/// 15 -> 16
pub fn field_change_start_order(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    for sref in ctx.suites()? {
        let suite = ctx.load_suite(&sref)?;
        ctx.create_index_best_effort(&start_order_index(&suite));
    }
    Ok(())
}

/// 16 -> 17
pub fn regression_indicator(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    for sref in ctx.suites()? {
        let suite = ctx.load_suite(&sref)?;
        ctx.create_index_best_effort(&regression_lookup_index(&suite));
    }
    Ok(())
}

/// 18 -> 19: collapse duplicate changes onto the newest row, then enforce
/// uniqueness of (test, field, machine, start order).
pub fn field_change_identity(ctx: &mut MigrationContext<'_>) -> anyhow::Result<()> {
    for sref in ctx.suites()? {
        let suite = ctx.load_suite(&sref)?;
        let fc_t = suite.table("FieldChangeV2");
        let ri_t = suite.table("RegressionIndicator");
        let ci_t = suite.table("ChangeIgnore");
        let merged = ctx.transaction(|tx| merge_duplicates(tx, &fc_t, &ri_t, &ci_t))?;
        if merged > 0 {
            tracing::info!(
                event = "perfwatch.migrate.field_changes_merged",
                suite = %suite.name,
                merged
            );
        }
        ctx.create_index_best_effort(&change_identity_index(&suite));
    }
    Ok(())
}

fn merge_duplicates(
    tx: &Transaction<'_>,
    fc_t: &str,
    ri_t: &str,
    ci_t: &str,
) -> anyhow::Result<usize> {
    type Key = (Option<i64>, Option<i64>, Option<i64>, Option<i64>);
    let mut groups: Vec<(Key, i64)> = Vec::new();
    {
        let mut stmt = tx.prepare(&format!(
            "SELECT TestID, FieldID, MachineID, StartOrderID, MAX(ID)
             FROM \"{}\"
             GROUP BY TestID, FieldID, MachineID, StartOrderID
             HAVING COUNT(*) > 1",
            fc_t
        ))?;
        let rows = stmt.query_map([], |r| -> rusqlite::Result<(Key, i64)> {
            Ok(((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?), r.get(4)?))
        })?;
        for r in rows {
            groups.push(r?);
        }
    }

    let same_group = "TestID IS ?1 AND FieldID IS ?2 AND MachineID IS ?3 AND StartOrderID IS ?4 AND ID != ?5";
    let mut merged = 0;
    for ((test, field, machine, start), keep) in groups {
        let args = params![test, field, machine, start, keep];
        tx.execute(
            &format!(
                "UPDATE \"{ri}\" SET FieldChangeID = ?5
                 WHERE FieldChangeID IN (SELECT ID FROM \"{fc}\" WHERE {cond})",
                ri = ri_t,
                fc = fc_t,
                cond = same_group
            ),
            args,
        )?;
        tx.execute(
            &format!(
                "UPDATE \"{ci}\" SET ChangeIgnoreID = ?5
                 WHERE ChangeIgnoreID IN (SELECT ID FROM \"{fc}\" WHERE {cond})",
                ci = ci_t,
                fc = fc_t,
                cond = same_group
            ),
            args,
        )?;
        merged += tx.execute(
            &format!("DELETE FROM \"{}\" WHERE {}", fc_t, same_group),
            args,
        )?;
    }

    if merged > 0 {
        tx.execute(
            &format!(
                "DELETE FROM \"{ri}\" WHERE ID NOT IN
                 (SELECT MIN(ID) FROM \"{ri}\" GROUP BY RegressionID, FieldChangeID)",
                ri = ri_t
            ),
            [],
        )?;
    }
    Ok(merged)
}
